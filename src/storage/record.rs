//! Record locations and snapshot-scoped document views

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Stable, storage-assigned location of a record.
///
/// Locations are unique within a collection and ordered by insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    /// Creates a record id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

/// Identifies the storage snapshot a view was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

/// A document as handed out by storage.
///
/// The view shares the storage engine's buffer and is only trustworthy for
/// the snapshot it was read in. Anything that must survive a yield takes an
/// owned copy with `to_owned_document`.
#[derive(Debug, Clone)]
pub struct SnapshotView {
    snapshot_id: SnapshotId,
    doc: Arc<Document>,
}

impl SnapshotView {
    /// Wraps a shared document read at `snapshot_id`
    pub fn new(snapshot_id: SnapshotId, doc: Arc<Document>) -> Self {
        Self { snapshot_id, doc }
    }

    /// Snapshot the view belongs to
    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    /// Borrow the document
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Copies the document out of the storage buffer
    pub fn to_owned_document(&self) -> Document {
        self.doc.as_ref().clone()
    }
}

/// A record returned by a record cursor
#[derive(Debug, Clone)]
pub struct Record {
    /// Location of the record
    pub id: RecordId,
    /// Document view
    pub data: SnapshotView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_ordering() {
        assert!(RecordId::new(1) < RecordId::new(2));
        assert_eq!(RecordId::new(7).as_u64(), 7);
    }

    #[test]
    fn test_owned_copy_is_independent() {
        let shared = Arc::new(json!({"a": 1}));
        let view = SnapshotView::new(SnapshotId(3), Arc::clone(&shared));
        let mut owned = view.to_owned_document();
        owned["a"] = json!(2);
        assert_eq!(view.document(), &json!({"a": 1}));
        assert_eq!(view.snapshot_id(), SnapshotId(3));
    }
}
