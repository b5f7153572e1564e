//! Incremental walking of interval bounds
//!
//! Given the key a cursor is on, the checker decides whether it is inside the
//! bounds, whether the cursor must skip ahead (and to where), or whether no
//! later key can be inside the bounds.

use std::cmp::Ordering;

use crate::document::{Direction, IndexKey, KeyPattern, KeyValue};

use super::bounds::{IndexBounds, Interval};
use super::cursor::SeekPoint;

/// Result of checking one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    /// The key is inside the bounds
    Valid,
    /// The key is outside; skip to the seek point
    MustAdvance(SeekPoint),
    /// No key at or after this one can be inside the bounds
    Done,
}

/// Checks keys against interval bounds for one scan direction.
#[derive(Debug, Clone)]
pub struct IndexBoundsChecker {
    /// Per-field intervals in scan order, start/end swapped for backward fields
    fields: Vec<Vec<Interval>>,
    dirs: Vec<Direction>,
}

impl IndexBoundsChecker {
    /// Creates a checker for bounds over `pattern`, scanning in `direction`.
    pub fn new(bounds: &IndexBounds, pattern: &KeyPattern, direction: Direction) -> Self {
        let dirs = pattern.scan_directions(direction);
        let fields = bounds
            .fields
            .iter()
            .zip(dirs.iter())
            .map(|(list, dir)| match dir {
                Direction::Forward => list.intervals.clone(),
                Direction::Backward => list
                    .intervals
                    .iter()
                    .rev()
                    .map(|i| Interval::new(i.end.clone(), i.end_inclusive, i.start.clone(), i.start_inclusive))
                    .collect(),
            })
            .collect();
        Self { fields, dirs }
    }

    /// Per-field scan directions
    pub fn directions(&self) -> &[Direction] {
        &self.dirs
    }

    /// Where a scan starts. None if the bounds admit no key.
    pub fn start_point(&self) -> Option<SeekPoint> {
        let mut suffix = Vec::with_capacity(self.fields.len());
        let mut inclusive = Vec::with_capacity(self.fields.len());
        for intervals in &self.fields {
            let first = intervals.first()?;
            suffix.push(first.start.clone());
            inclusive.push(first.start_inclusive);
        }
        Some(SeekPoint {
            prefix: Vec::new(),
            after_prefix: false,
            suffix,
            suffix_inclusive: inclusive,
        })
    }

    /// Classifies `key` against the bounds.
    pub fn check_key(&self, key: &IndexKey) -> KeyState {
        for (i, intervals) in self.fields.iter().enumerate() {
            let Some(value) = key.get(i) else {
                return KeyState::Done;
            };
            let dir = self.dirs[i];

            // 1. First interval the value has not already passed
            let Some(pos) = intervals.iter().position(|iv| !past_end(value, iv, dir)) else {
                if i == 0 {
                    return KeyState::Done;
                }
                return KeyState::MustAdvance(SeekPoint {
                    prefix: key.values()[..i].to_vec(),
                    after_prefix: true,
                    suffix: Vec::new(),
                    suffix_inclusive: Vec::new(),
                });
            };

            // 2. Inside it, or still ahead of its start
            let interval = &intervals[pos];
            if before_start(value, interval, dir) {
                let mut suffix = vec![interval.start.clone()];
                let mut inclusive = vec![interval.start_inclusive];
                for later in &self.fields[i + 1..] {
                    if let Some(first) = later.first() {
                        suffix.push(first.start.clone());
                        inclusive.push(first.start_inclusive);
                    }
                }
                return KeyState::MustAdvance(SeekPoint {
                    prefix: key.values()[..i].to_vec(),
                    after_prefix: false,
                    suffix,
                    suffix_inclusive: inclusive,
                });
            }
        }
        KeyState::Valid
    }

    /// Returns true if `key` lies inside the bounds
    pub fn is_valid_key(&self, key: &IndexKey) -> bool {
        key.len() == self.fields.len() && matches!(self.check_key(key), KeyState::Valid)
    }
}

fn past_end(value: &KeyValue, interval: &Interval, dir: Direction) -> bool {
    match dir.apply(value.cmp(&interval.end)) {
        Ordering::Greater => true,
        Ordering::Equal => !interval.end_inclusive,
        Ordering::Less => false,
    }
}

fn before_start(value: &KeyValue, interval: &Interval, dir: Direction) -> bool {
    match dir.apply(value.cmp(&interval.start)) {
        Ordering::Less => true,
        Ordering::Equal => !interval.start_inclusive,
        Ordering::Greater => false,
    }
}
