//! Storage subsystem
//!
//! Record locations, snapshot-scoped document views and the record store
//! interface the execution stages read through. `ExtentCollection` is the
//! in-memory implementation used by the executor and its tests.

mod collection;
mod errors;
mod record;

pub use collection::{ExtentCollection, RecordCursor, RecordStore};
pub use errors::{StorageError, StorageResult};
pub use record::{Record, RecordId, SnapshotId, SnapshotView};
