//! Record store interface and the in-memory extent collection
//!
//! Records live in fixed-capacity extents allocated in insertion order, the
//! way a capped collection lays out its data. Cursors are positioned by the
//! last record they returned, so a record removed underneath a cursor never
//! strands it.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::document::{Direction, Document};

use super::errors::{StorageError, StorageResult};
use super::record::{Record, RecordId, SnapshotId, SnapshotView};

/// Iterates records of a store in location order.
pub trait RecordCursor: Send {
    /// Returns the next record, or None at the end.
    ///
    /// A write conflict leaves the cursor where it was; calling `next` again
    /// after yielding returns the same record.
    fn next(&mut self) -> StorageResult<Option<Record>>;

    /// Prepares for a yield
    fn save(&mut self);

    /// Re-establishes the position after a yield.
    ///
    /// Returns false if the cursor can no longer continue (its extent is gone).
    fn restore(&mut self) -> StorageResult<bool>;

    /// Notifies the cursor that `loc` is about to be deleted.
    fn invalidate(&mut self, loc: RecordId);
}

/// Access to the records of one collection.
pub trait RecordStore: Send + Sync {
    /// Cursor over the whole collection
    fn cursor(&self, direction: Direction) -> Box<dyn RecordCursor>;

    /// One forward cursor per extent, oldest extent first.
    fn extent_cursors(&self) -> StorageResult<Vec<Box<dyn RecordCursor>>>;

    /// Reads a record by location
    fn fetch(&self, loc: RecordId) -> StorageResult<Option<SnapshotView>>;

    /// Returns true if reading `loc` would have to wait on I/O
    fn needs_fetch(&self, loc: RecordId) -> bool;

    /// Brings `loc` into memory
    fn page_in(&self, loc: RecordId) -> StorageResult<()>;
}

#[derive(Debug)]
struct Extent {
    id: u64,
    records: BTreeSet<RecordId>,
    allocated: usize,
}

#[derive(Debug, Default)]
struct CollectionState {
    records: BTreeMap<RecordId, Arc<Document>>,
    extents: VecDeque<Extent>,
    paged_out: HashSet<RecordId>,
    next_record: u64,
    next_extent: u64,
    snapshot: u64,
}

impl CollectionState {
    fn view(&self, doc: &Arc<Document>) -> SnapshotView {
        SnapshotView::new(SnapshotId(self.snapshot), Arc::clone(doc))
    }

    fn extent(&self, id: u64) -> Option<&Extent> {
        self.extents.iter().find(|e| e.id == id)
    }
}

/// In-memory collection made of fixed-capacity extents.
///
/// Supports paged-out records (to exercise fetch requests) and injected write
/// conflicts (to exercise yield-and-retry paths).
#[derive(Debug, Clone)]
pub struct ExtentCollection {
    shared: Arc<RwLock<CollectionState>>,
    conflicts: Arc<AtomicUsize>,
    extent_capacity: usize,
}

impl ExtentCollection {
    /// Creates an empty collection; every extent holds `extent_capacity` records.
    pub fn new(extent_capacity: usize) -> Self {
        Self {
            shared: Arc::new(RwLock::new(CollectionState::default())),
            conflicts: Arc::new(AtomicUsize::new(0)),
            extent_capacity: extent_capacity.max(1),
        }
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, CollectionState>> {
        self.shared
            .read()
            .map_err(|_| StorageError::LockPoisoned("collection".into()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, CollectionState>> {
        self.shared
            .write()
            .map_err(|_| StorageError::LockPoisoned("collection".into()))
    }

    /// Appends a document, returning its location.
    pub fn insert(&self, doc: Document) -> StorageResult<RecordId> {
        let mut state = self.write()?;
        state.next_record += 1;
        state.snapshot += 1;
        let loc = RecordId::new(state.next_record);

        let needs_extent = state
            .extents
            .back()
            .map_or(true, |e| e.allocated >= self.extent_capacity);
        if needs_extent {
            let id = state.next_extent;
            state.next_extent += 1;
            state.extents.push_back(Extent {
                id,
                records: BTreeSet::new(),
                allocated: 0,
            });
        }
        if let Some(extent) = state.extents.back_mut() {
            extent.records.insert(loc);
            extent.allocated += 1;
        }
        state.records.insert(loc, Arc::new(doc));
        Ok(loc)
    }

    /// Replaces the document at `loc` in place.
    pub fn update(&self, loc: RecordId, doc: Document) -> StorageResult<()> {
        let mut state = self.write()?;
        if !state.records.contains_key(&loc) {
            return Err(StorageError::RecordNotFound(loc));
        }
        state.snapshot += 1;
        state.records.insert(loc, Arc::new(doc));
        Ok(())
    }

    /// Removes the record at `loc`.
    pub fn remove(&self, loc: RecordId) -> StorageResult<Document> {
        let mut state = self.write()?;
        let doc = state
            .records
            .remove(&loc)
            .ok_or(StorageError::RecordNotFound(loc))?;
        state.snapshot += 1;
        state.paged_out.remove(&loc);
        for extent in state.extents.iter_mut() {
            if extent.records.remove(&loc) {
                break;
            }
        }
        Ok(Arc::try_unwrap(doc).unwrap_or_else(|shared| shared.as_ref().clone()))
    }

    /// Drops the oldest extent and every record in it, returning their locations.
    pub fn drop_oldest_extent(&self) -> StorageResult<Vec<RecordId>> {
        let mut state = self.write()?;
        let Some(extent) = state.extents.pop_front() else {
            return Ok(Vec::new());
        };
        state.snapshot += 1;
        let locs: Vec<RecordId> = extent.records.into_iter().collect();
        for loc in &locs {
            state.records.remove(loc);
            state.paged_out.remove(loc);
        }
        Ok(locs)
    }

    /// Marks a record as not resident in memory.
    pub fn mark_paged_out(&self, loc: RecordId) -> StorageResult<()> {
        let mut state = self.write()?;
        if !state.records.contains_key(&loc) {
            return Err(StorageError::RecordNotFound(loc));
        }
        state.paged_out.insert(loc);
        Ok(())
    }

    /// Makes the next `count` cursor reads fail with a write conflict.
    pub fn inject_write_conflicts(&self, count: usize) {
        self.conflicts.fetch_add(count, Ordering::SeqCst);
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.read().map(|s| s.records.len()).unwrap_or(0)
    }

    /// Returns true if the collection holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of extents currently allocated
    pub fn extent_count(&self) -> usize {
        self.read().map(|s| s.extents.len()).unwrap_or(0)
    }

    fn new_cursor(&self, direction: Direction, extent: Option<u64>) -> ExtentCursor {
        ExtentCursor {
            shared: Arc::clone(&self.shared),
            conflicts: Arc::clone(&self.conflicts),
            direction,
            extent,
            last: None,
            eof: false,
        }
    }
}

impl RecordStore for ExtentCollection {
    fn cursor(&self, direction: Direction) -> Box<dyn RecordCursor> {
        Box::new(self.new_cursor(direction, None))
    }

    fn extent_cursors(&self) -> StorageResult<Vec<Box<dyn RecordCursor>>> {
        take_conflict(&self.conflicts, "extent_cursors")?;
        let state = self.read()?;
        Ok(state
            .extents
            .iter()
            .map(|e| Box::new(self.new_cursor(Direction::Forward, Some(e.id))) as Box<dyn RecordCursor>)
            .collect())
    }

    fn fetch(&self, loc: RecordId) -> StorageResult<Option<SnapshotView>> {
        let state = self.read()?;
        Ok(state.records.get(&loc).map(|doc| state.view(doc)))
    }

    fn needs_fetch(&self, loc: RecordId) -> bool {
        self.read()
            .map(|s| s.paged_out.contains(&loc))
            .unwrap_or(false)
    }

    fn page_in(&self, loc: RecordId) -> StorageResult<()> {
        let mut state = self.write()?;
        state.paged_out.remove(&loc);
        Ok(())
    }
}

fn take_conflict(conflicts: &AtomicUsize, context: &str) -> StorageResult<()> {
    let taken = conflicts
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if taken {
        Err(StorageError::write_conflict(context))
    } else {
        Ok(())
    }
}

/// Cursor over an `ExtentCollection`, optionally confined to one extent.
struct ExtentCursor {
    shared: Arc<RwLock<CollectionState>>,
    conflicts: Arc<AtomicUsize>,
    direction: Direction,
    extent: Option<u64>,
    last: Option<RecordId>,
    eof: bool,
}

impl ExtentCursor {
    fn lower(&self) -> Bound<RecordId> {
        match (self.direction, self.last) {
            (Direction::Forward, Some(last)) => Bound::Excluded(last),
            _ => Bound::Unbounded,
        }
    }

    fn upper(&self) -> Bound<RecordId> {
        match (self.direction, self.last) {
            (Direction::Backward, Some(last)) => Bound::Excluded(last),
            _ => Bound::Unbounded,
        }
    }

    fn step<'a, I>(&self, mut iter: I) -> Option<RecordId>
    where
        I: DoubleEndedIterator<Item = &'a RecordId>,
    {
        match self.direction {
            Direction::Forward => iter.next().copied(),
            Direction::Backward => iter.next_back().copied(),
        }
    }
}

impl RecordCursor for ExtentCursor {
    fn next(&mut self) -> StorageResult<Option<Record>> {
        if self.eof {
            return Ok(None);
        }
        take_conflict(&self.conflicts, "record cursor")?;

        let state = self
            .shared
            .read()
            .map_err(|_| StorageError::LockPoisoned("collection".into()))?;
        let range = (self.lower(), self.upper());

        let next = match self.extent {
            Some(id) => match state.extent(id) {
                Some(extent) => self.step(extent.records.range(range)),
                None => None,
            },
            None => self.step(state.records.range(range).map(|(loc, _)| loc)),
        };

        let Some(loc) = next else {
            self.eof = true;
            return Ok(None);
        };
        let Some(doc) = state.records.get(&loc) else {
            self.eof = true;
            return Ok(None);
        };
        self.last = Some(loc);
        Ok(Some(Record {
            id: loc,
            data: state.view(doc),
        }))
    }

    fn save(&mut self) {}

    fn restore(&mut self) -> StorageResult<bool> {
        let state = self
            .shared
            .read()
            .map_err(|_| StorageError::LockPoisoned("collection".into()))?;
        Ok(match self.extent {
            Some(id) => state.extent(id).is_some(),
            None => true,
        })
    }

    fn invalidate(&mut self, _loc: RecordId) {
        // Positioned by the last returned location, which stays a valid
        // range bound after that record is removed.
    }
}
