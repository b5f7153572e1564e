//! Index cursor interface
//!
//! Cursors walk an index in scan order. Every call may fail with a storage
//! write conflict, in which case the cursor has not moved.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::document::{Direction, IndexKey, KeyPattern, KeyValue};
use crate::storage::{RecordId, StorageResult};

/// One (key, location) pair stored in an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Index key
    pub key: IndexKey,
    /// Location of the indexed record
    pub loc: RecordId,
}

/// A position to skip to, expressed relative to key values.
///
/// The first `prefix.len()` key fields must equal `prefix`. With
/// `after_prefix`, every key sharing the prefix is skipped. Otherwise the
/// remaining fields are compared against `suffix`, where an exclusive
/// component skips keys equal to it at that field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeekPoint {
    /// Leading key values to stay on
    pub prefix: Vec<KeyValue>,
    /// Skip past all keys with this prefix
    pub after_prefix: bool,
    /// Target values for the fields after the prefix
    pub suffix: Vec<KeyValue>,
    /// Inclusivity of each suffix value
    pub suffix_inclusive: Vec<bool>,
}

impl SeekPoint {
    /// Seek to the first key at or after `key` in scan order
    pub fn at_key(key: &IndexKey) -> Self {
        Self {
            prefix: Vec::new(),
            after_prefix: false,
            suffix: key.values().to_vec(),
            suffix_inclusive: vec![true; key.len()],
        }
    }

    /// Returns true if `key` comes strictly before this point when walking in
    /// the per-field scan directions `dirs`.
    pub fn is_before(&self, key: &IndexKey, dirs: &[Direction]) -> bool {
        let dir = |i: usize| dirs.get(i).copied().unwrap_or(Direction::Forward);

        for (i, target) in self.prefix.iter().enumerate() {
            let Some(value) = key.get(i) else {
                return true;
            };
            match dir(i).apply(value.cmp(target)) {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => {}
            }
        }
        if self.after_prefix {
            return true;
        }

        let offset = self.prefix.len();
        for (j, target) in self.suffix.iter().enumerate() {
            let Some(value) = key.get(offset + j) else {
                return true;
            };
            match dir(offset + j).apply(value.cmp(target)) {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => {
                    if !self.suffix_inclusive.get(j).copied().unwrap_or(true) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Cursor over a sorted index
pub trait IndexCursor: Send {
    /// Positions on the first entry not before `point`
    fn seek(&mut self, point: &SeekPoint) -> StorageResult<()>;

    /// Advances to the next entry
    fn next(&mut self) -> StorageResult<()>;

    /// The entry the cursor is on, None at EOF
    fn current(&self) -> Option<&IndexEntry>;

    /// Returns true when there are no more entries
    fn is_eof(&self) -> bool {
        self.current().is_none()
    }

    /// Remembers the current (key, location) ahead of a yield
    fn save_position(&mut self);

    /// Repositions on the first entry at or after the saved one.
    fn restore_position(&mut self) -> StorageResult<()>;
}

/// Static description of an index
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    /// Index name
    pub name: String,
    /// Key pattern, shared with every key datum produced from the index
    pub key_pattern: Arc<KeyPattern>,
    /// True once any document produced more than one key
    pub multikey: bool,
}

/// A sorted index that hands out cursors
pub trait SortedDataInterface: Send + Sync {
    /// Describes the index
    fn descriptor(&self) -> IndexDescriptor;

    /// Opens an unpositioned cursor walking in `direction`
    fn new_cursor(&self, direction: Direction) -> Box<dyn IndexCursor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: &[i64]) -> IndexKey {
        IndexKey::new(values.iter().map(|v| KeyValue::from(*v)).collect())
    }

    const FWD: [Direction; 2] = [Direction::Forward, Direction::Forward];

    #[test]
    fn test_at_key_is_inclusive() {
        let point = SeekPoint::at_key(&key(&[5]));
        assert!(point.is_before(&key(&[4, 9]), &FWD));
        assert!(!point.is_before(&key(&[5, 0]), &FWD));
        assert!(!point.is_before(&key(&[6, 0]), &FWD));
    }

    #[test]
    fn test_after_prefix_skips_prefix() {
        let point = SeekPoint {
            prefix: vec![KeyValue::from(3)],
            after_prefix: true,
            ..Default::default()
        };
        assert!(point.is_before(&key(&[3, 100]), &FWD));
        assert!(!point.is_before(&key(&[4, 0]), &FWD));
    }

    #[test]
    fn test_exclusive_suffix() {
        let point = SeekPoint {
            prefix: vec![KeyValue::from(1)],
            after_prefix: false,
            suffix: vec![KeyValue::from(7)],
            suffix_inclusive: vec![false],
        };
        assert!(point.is_before(&key(&[1, 7]), &FWD));
        assert!(!point.is_before(&key(&[1, 8]), &FWD));
    }

    #[test]
    fn test_backward_direction() {
        let point = SeekPoint::at_key(&key(&[5]));
        let back = [Direction::Backward];
        assert!(point.is_before(&key(&[6]), &back));
        assert!(!point.is_before(&key(&[4]), &back));
    }
}
