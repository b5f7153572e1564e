//! In-memory sorted index
//!
//! Entries are kept in a vector sorted by index order (key pattern comparison,
//! then record location), guarded by a lock. Cursors remember the entry they
//! are on by value, so concurrent inserts and removals never leave a cursor
//! pointing at the wrong slot.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockReadGuard, TryLockError};

use crate::document::{Direction, Document, KeyPattern};
use crate::storage::{RecordId, StorageError, StorageResult};

use super::cursor::{IndexCursor, IndexDescriptor, IndexEntry, SeekPoint, SortedDataInterface};
use super::errors::{IndexError, IndexResult};
use super::key_generator::BtreeKeyGenerator;

#[derive(Debug, Default)]
struct IndexState {
    entries: Vec<IndexEntry>,
    multikey: bool,
}

/// Sorted index over one key pattern, maintained from documents.
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    name: String,
    pattern: Arc<KeyPattern>,
    generator: BtreeKeyGenerator,
    shared: Arc<RwLock<IndexState>>,
    conflicts: Arc<AtomicUsize>,
}

impl InMemoryIndex {
    /// Creates an empty index
    pub fn new(name: impl Into<String>, pattern: KeyPattern) -> IndexResult<Self> {
        Self::with_options(name, pattern, false)
    }

    /// Creates an empty index; a sparse index skips documents missing every field.
    pub fn with_options(name: impl Into<String>, pattern: KeyPattern, sparse: bool) -> IndexResult<Self> {
        let generator = BtreeKeyGenerator::new(pattern.clone(), sparse)?;
        Ok(Self {
            name: name.into(),
            pattern: Arc::new(pattern),
            generator,
            shared: Arc::new(RwLock::new(IndexState::default())),
            conflicts: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Shared key pattern
    pub fn key_pattern(&self) -> Arc<KeyPattern> {
        Arc::clone(&self.pattern)
    }

    /// Indexes `doc` stored at `loc`, returning the number of keys added.
    pub fn insert_document(&self, doc: &Document, loc: RecordId) -> IndexResult<usize> {
        let generated = self.generator.get_keys(doc)?;
        let mut state = self
            .shared
            .write()
            .map_err(|_| IndexError::BuildFailed(format!("index {} lock poisoned", self.name)))?;
        state.multikey |= generated.multikey;

        let mut added = 0;
        for key in generated.keys {
            let entry = IndexEntry { key, loc };
            match state
                .entries
                .binary_search_by(|probe| index_order(&self.pattern, probe, &entry))
            {
                Ok(_) => {}
                Err(pos) => {
                    state.entries.insert(pos, entry);
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Removes the keys `doc` produced at `loc`, returning the number removed.
    pub fn remove_document(&self, doc: &Document, loc: RecordId) -> IndexResult<usize> {
        let generated = self.generator.get_keys(doc)?;
        let mut state = self
            .shared
            .write()
            .map_err(|_| IndexError::BuildFailed(format!("index {} lock poisoned", self.name)))?;

        let mut removed = 0;
        for key in generated.keys {
            let entry = IndexEntry { key, loc };
            if let Ok(pos) = state
                .entries
                .binary_search_by(|probe| index_order(&self.pattern, probe, &entry))
            {
                state.entries.remove(pos);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of entries
    pub fn entry_count(&self) -> usize {
        self.shared.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Makes the next `count` cursor operations fail with a write conflict.
    pub fn inject_write_conflicts(&self, count: usize) {
        self.conflicts.fetch_add(count, AtomicOrdering::SeqCst);
    }
}

impl SortedDataInterface for InMemoryIndex {
    fn descriptor(&self) -> IndexDescriptor {
        IndexDescriptor {
            name: self.name.clone(),
            key_pattern: Arc::clone(&self.pattern),
            multikey: self.shared.read().map(|s| s.multikey).unwrap_or(false),
        }
    }

    fn new_cursor(&self, direction: Direction) -> Box<dyn IndexCursor> {
        Box::new(InMemoryCursor {
            shared: Arc::clone(&self.shared),
            conflicts: Arc::clone(&self.conflicts),
            pattern: Arc::clone(&self.pattern),
            direction,
            dirs: self.pattern.scan_directions(direction),
            current: None,
            saved: None,
        })
    }
}

fn index_order(pattern: &KeyPattern, a: &IndexEntry, b: &IndexEntry) -> Ordering {
    pattern.compare(&a.key, &b.key).then_with(|| a.loc.cmp(&b.loc))
}

struct InMemoryCursor {
    shared: Arc<RwLock<IndexState>>,
    conflicts: Arc<AtomicUsize>,
    pattern: Arc<KeyPattern>,
    direction: Direction,
    dirs: Vec<Direction>,
    current: Option<IndexEntry>,
    saved: Option<IndexEntry>,
}

impl InMemoryCursor {
    fn lock(&self) -> StorageResult<RwLockReadGuard<'_, IndexState>> {
        let taken = self
            .conflicts
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            return Err(StorageError::write_conflict("index cursor"));
        }
        match self.shared.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(StorageError::write_conflict("index locked")),
            Err(TryLockError::Poisoned(_)) => Err(StorageError::LockPoisoned("index".into())),
        }
    }

    /// First entry at or after `target` in scan order (strictly after when `strict`).
    fn locate(&self, entries: &[IndexEntry], target: &IndexEntry, strict: bool) -> Option<IndexEntry> {
        let pattern = &self.pattern;
        match self.direction {
            Direction::Forward => {
                let pos = entries.partition_point(|e| {
                    let ord = index_order(pattern, e, target);
                    ord == Ordering::Less || (strict && ord == Ordering::Equal)
                });
                entries.get(pos).cloned()
            }
            Direction::Backward => {
                let pos = entries.partition_point(|e| {
                    let ord = index_order(pattern, e, target);
                    ord == Ordering::Less || (!strict && ord == Ordering::Equal)
                });
                pos.checked_sub(1).and_then(|p| entries.get(p)).cloned()
            }
        }
    }
}

impl IndexCursor for InMemoryCursor {
    fn seek(&mut self, point: &SeekPoint) -> StorageResult<()> {
        let state = self.lock()?;
        let entries = &state.entries;
        let found = match self.direction {
            Direction::Forward => {
                let pos = entries.partition_point(|e| point.is_before(&e.key, &self.dirs));
                entries.get(pos).cloned()
            }
            Direction::Backward => {
                let pos = entries.partition_point(|e| !point.is_before(&e.key, &self.dirs));
                pos.checked_sub(1).and_then(|p| entries.get(p)).cloned()
            }
        };
        drop(state);
        self.current = found;
        Ok(())
    }

    fn next(&mut self) -> StorageResult<()> {
        let Some(current) = self.current.clone() else {
            return Ok(());
        };
        let state = self.lock()?;
        let next = self.locate(&state.entries, &current, true);
        drop(state);
        self.current = next;
        Ok(())
    }

    fn current(&self) -> Option<&IndexEntry> {
        self.current.as_ref()
    }

    fn save_position(&mut self) {
        self.saved = self.current.clone();
    }

    fn restore_position(&mut self) -> StorageResult<()> {
        let Some(saved) = self.saved.clone() else {
            self.current = None;
            return Ok(());
        };
        let state = self.lock()?;
        let restored = self.locate(&state.entries, &saved, false);
        drop(state);
        self.current = restored;
        Ok(())
    }
}
