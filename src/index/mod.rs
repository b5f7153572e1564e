//! Index subsystem
//!
//! Key generation, bounds, and the sorted index the scan stages read from.
//!
//! # Invariants
//!
//! - Index order is key pattern order, ties broken by record location
//! - Interval bounds are stored ascending; the checker orients them per scan
//! - Cursor calls that fail with a write conflict do not move the cursor

mod bounds;
mod bounds_checker;
mod btree;
mod cursor;
mod errors;
mod key_generator;

pub use bounds::{IndexBounds, Interval, OrderedIntervalList, ScanBounds};
pub use bounds_checker::{IndexBoundsChecker, KeyState};
pub use btree::InMemoryIndex;
pub use cursor::{IndexCursor, IndexDescriptor, IndexEntry, SeekPoint, SortedDataInterface};
pub use errors::{IndexError, IndexResult};
pub use key_generator::{BtreeKeyGenerator, GeneratedKeys};
