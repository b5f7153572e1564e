//! Working set tests
//!
//! - IDs are never reused while referenced
//! - Freed and flagged members fail loudly
//! - Yield preparation makes storage-backed members own their documents

use std::collections::HashSet;
use std::sync::Arc;

use aeroexec::document::{IndexKey, KeyPattern, KeyValue};
use aeroexec::exec::{ComputedData, ComputedDataKind, ExecErrorCode, IndexKeyDatum, WorkingSet};
use aeroexec::storage::{RecordId, SnapshotId, SnapshotView};
use serde_json::json;

// =============================================================================
// Allocation
// =============================================================================

#[test]
fn test_ids_unique_across_free() {
    let mut ws = WorkingSet::new();
    let mut live = HashSet::new();
    let mut seen = HashSet::new();

    for round in 0..50 {
        let id = ws.allocate();
        assert!(seen.insert(id), "{} handed out twice", id);
        live.insert(id);
        if round % 3 == 0 {
            let victim = *live.iter().next().unwrap();
            live.remove(&victim);
            ws.free(victim).unwrap();
        }
    }
    assert_eq!(ws.len(), live.len());
}

#[test]
fn test_freed_id_detected() {
    let mut ws = WorkingSet::new();
    let id = ws.allocate();
    ws.free(id).unwrap();

    assert_eq!(ws.get(id).unwrap_err().code(), ExecErrorCode::AeroExecInvariant);
    assert!(ws.free(id).unwrap_err().is_fatal());
}

// =============================================================================
// Member states
// =============================================================================

#[test]
fn test_index_member_reads_fields_from_key() {
    let mut ws = WorkingSet::new();
    let id = ws.allocate();
    let pattern = Arc::new(KeyPattern::ascending(&["a", "b"]));
    ws.get_mut(id).unwrap().set_loc_and_idx(
        RecordId::new(9),
        vec![IndexKeyDatum::new(pattern, IndexKey::new(vec![KeyValue::from(1), KeyValue::from("x")]))],
    );

    let member = ws.get(id).unwrap();
    assert_eq!(member.state_name(), "LOC_AND_IDX");
    assert!(!member.has_obj());
    assert_eq!(member.get_field_dotted("b"), Some(json!("x")));
    assert_eq!(member.get_field_dotted("c"), None);
}

#[test]
fn test_computed_data_attached_once_per_kind() {
    let mut ws = WorkingSet::new();
    let id = ws.allocate();
    let member = ws.get_mut(id).unwrap();
    member.add_computed(ComputedData::TextScore(1.5));
    member.add_computed(ComputedData::TextScore(2.5));

    assert!(member.has_computed(ComputedDataKind::TextScore));
    assert_eq!(member.text_score(), Some(2.5));
    assert!(!member.has_computed(ComputedDataKind::GeoDistance));
}

// =============================================================================
// Flagging and yields
// =============================================================================

#[test]
fn test_flagged_member_must_be_unflagged_before_free() {
    let mut ws = WorkingSet::new();
    let id = ws.allocate();
    let view = SnapshotView::new(SnapshotId(3), Arc::new(json!({"a": 1})));
    ws.get_mut(id).unwrap().set_unowned_obj(RecordId::new(1), view);

    // Only owned documents can be flagged.
    assert!(ws.flag_for_review(id).is_err());

    ws.get_mut(id).unwrap().fetch_and_invalidate().unwrap();
    ws.flag_for_review(id).unwrap();
    assert!(ws.free(id).is_err());
    assert!(ws.unflag(id));
    ws.free(id).unwrap();
}

#[test]
fn test_prepare_for_yield_keeps_locations() {
    let mut ws = WorkingSet::new();
    let ids: Vec<_> = (1..=3)
        .map(|i| {
            let id = ws.allocate();
            let view = SnapshotView::new(SnapshotId(1), Arc::new(json!({"i": i})));
            ws.get_mut(id).unwrap().set_unowned_obj(RecordId::new(i), view);
            id
        })
        .collect();

    assert_eq!(ws.prepare_for_yield(), 3);
    for (i, id) in ids.iter().enumerate() {
        let member = ws.get(*id).unwrap();
        assert!(member.has_owned_obj());
        assert_eq!(member.loc(), Some(RecordId::new(i as u64 + 1)));
    }
    assert_eq!(ws.prepare_for_yield(), 0);
}
