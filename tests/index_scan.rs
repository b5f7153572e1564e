//! Index scan tests
//!
//! - Results are ordered by the scan direction
//! - Simple-range end keys respect inclusivity
//! - Multikey indexes never return a location twice
//! - save/restore without mutation does not change the next result
//! - Deletions during a yield are survived

use std::sync::Arc;

use aeroexec::document::{Direction, IndexKey, KeyPattern, KeyValue};
use aeroexec::exec::{
    IndexScan, IndexScanParams, InvalidationType, PlanStage, SpecificStats, StageState, WorkingSet,
};
use aeroexec::index::{IndexBounds, InMemoryIndex, ScanBounds};
use aeroexec::matcher::Predicate;
use aeroexec::storage::RecordId;
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn build_index(docs: &[Value]) -> Arc<InMemoryIndex> {
    let index = InMemoryIndex::new("a_1", KeyPattern::ascending(&["a"])).unwrap();
    for (i, doc) in docs.iter().enumerate() {
        index.insert_document(doc, RecordId::new(i as u64 + 1)).unwrap();
    }
    Arc::new(index)
}

fn ints(values: impl IntoIterator<Item = i64>) -> Vec<Value> {
    values.into_iter().map(|a| json!({ "a": a })).collect()
}

fn simple_range(start: i64, end: i64, inclusive: bool) -> ScanBounds {
    ScanBounds::SimpleRange {
        start_key: IndexKey::new(vec![KeyValue::from(start)]),
        end_key: IndexKey::new(vec![KeyValue::from(end)]),
        end_key_inclusive: inclusive,
    }
}

/// Works the stage once, returning the key value if it advanced.
fn step(stage: &mut IndexScan, ws: &mut WorkingSet) -> Option<Option<(i64, u64)>> {
    match stage.work(ws).unwrap() {
        StageState::Advanced(id) => {
            let member = ws.get(id).unwrap();
            let a = member.get_field_dotted("a").unwrap().as_i64().unwrap();
            let loc = member.loc().unwrap().as_u64();
            ws.free(id).unwrap();
            Some(Some((a, loc)))
        }
        StageState::IsEof => None,
        StageState::NeedTime | StageState::NeedYield => Some(None),
        other => panic!("unexpected state {:?}", other),
    }
}

fn drain(stage: &mut IndexScan, ws: &mut WorkingSet) -> Vec<(i64, u64)> {
    let mut out = Vec::new();
    while let Some(result) = step(stage, ws) {
        out.extend(result);
    }
    out
}

fn keys(results: &[(i64, u64)]) -> Vec<i64> {
    results.iter().map(|(a, _)| *a).collect()
}

// =============================================================================
// Ordering and Bounds
// =============================================================================

#[test]
fn test_forward_scan_non_decreasing() {
    let index = build_index(&ints([5, 3, 9, 3, 1, 7]));
    let mut ws = WorkingSet::new();
    let bounds = ScanBounds::Intervals(IndexBounds::all_values(&KeyPattern::ascending(&["a"])));
    let mut stage = IndexScan::new(index, IndexScanParams::new(bounds), None);

    let out = keys(&drain(&mut stage, &mut ws));
    assert_eq!(out, vec![1, 3, 3, 5, 7, 9]);
}

#[test]
fn test_backward_scan_non_increasing() {
    let index = build_index(&ints([5, 3, 9, 1, 7]));
    let mut ws = WorkingSet::new();
    let bounds = ScanBounds::Intervals(IndexBounds::all_values(&KeyPattern::ascending(&["a"])));
    let mut params = IndexScanParams::new(bounds);
    params.direction = Direction::Backward;
    let mut stage = IndexScan::new(index, params, None);

    assert_eq!(keys(&drain(&mut stage, &mut ws)), vec![9, 7, 5, 3, 1]);
}

#[test]
fn test_exclusive_end_never_returned() {
    let index = build_index(&ints(1..=10));
    let mut ws = WorkingSet::new();
    let mut stage = IndexScan::new(index, IndexScanParams::new(simple_range(3, 6, false)), None);
    let out = keys(&drain(&mut stage, &mut ws));
    assert_eq!(out, vec![3, 4, 5]);
}

#[test]
fn test_inclusive_end_is_last() {
    let index = build_index(&ints(1..=10));
    let mut ws = WorkingSet::new();
    let mut stage = IndexScan::new(index, IndexScanParams::new(simple_range(3, 6, true)), None);
    let out = keys(&drain(&mut stage, &mut ws));
    assert_eq!(out.last(), Some(&6));
    assert_eq!(out.len(), 4);
}

#[test]
fn test_predicate_bounds_on_compound_index() {
    let pattern = KeyPattern::ascending(&["a", "b"]);
    let index = InMemoryIndex::new("a_1_b_1", pattern.clone()).unwrap();
    let mut loc = 0;
    for a in 1..=3 {
        for b in 1..=3 {
            loc += 1;
            index
                .insert_document(&json!({"a": a, "b": b}), RecordId::new(loc))
                .unwrap();
        }
    }
    let bounds = IndexBounds::from_predicates(
        &pattern,
        &[Predicate::is_in("a", vec![json!(1), json!(3)]), Predicate::gte("b", json!(2))],
    )
    .unwrap();

    let mut ws = WorkingSet::new();
    let mut stage = IndexScan::new(Arc::new(index), IndexScanParams::new(ScanBounds::Intervals(bounds)), None);
    let mut pairs = Vec::new();
    loop {
        match stage.work(&mut ws).unwrap() {
            StageState::Advanced(id) => {
                let member = ws.get(id).unwrap();
                pairs.push((
                    member.get_field_dotted("a").unwrap().as_i64().unwrap(),
                    member.get_field_dotted("b").unwrap().as_i64().unwrap(),
                ));
            }
            StageState::IsEof => break,
            _ => {}
        }
    }
    assert_eq!(pairs, vec![(1, 2), (1, 3), (3, 2), (3, 3)]);
}

// =============================================================================
// Multikey
// =============================================================================

#[test]
fn test_multikey_returns_each_location_once() {
    let index = build_index(&[json!({"a": [1, 2, 3]}), json!({"a": [2, 3]}), json!({"a": 4})]);
    let mut ws = WorkingSet::new();
    let bounds = ScanBounds::Intervals(IndexBounds::all_values(&KeyPattern::ascending(&["a"])));
    let mut stage = IndexScan::new(index, IndexScanParams::new(bounds), None);

    let locs: Vec<u64> = drain(&mut stage, &mut ws).iter().map(|(_, l)| *l).collect();
    assert_eq!(locs, vec![1, 2, 3]);
    match stage.stats().specific {
        SpecificStats::IndexScan(s) => {
            assert!(s.is_multikey);
            assert_eq!(s.dups_dropped, 3);
        }
        other => panic!("unexpected stats {:?}", other),
    }
}

#[test]
fn test_deleted_location_may_return_again() {
    let index = build_index(&[json!({"a": [1, 5]})]);
    let mut ws = WorkingSet::new();
    let bounds = ScanBounds::Intervals(IndexBounds::all_values(&KeyPattern::ascending(&["a"])));
    let mut stage = IndexScan::new(index, IndexScanParams::new(bounds), None);

    let mut first = step(&mut stage, &mut ws);
    while first == Some(None) {
        first = step(&mut stage, &mut ws);
    }
    assert_eq!(first, Some(Some((1, 1))));
    stage
        .invalidate(&mut ws, RecordId::new(1), InvalidationType::Deletion)
        .unwrap();

    assert_eq!(drain(&mut stage, &mut ws), vec![(5, 1)]);
}

// =============================================================================
// Yielding
// =============================================================================

#[test]
fn test_yield_round_trip_is_transparent() {
    let docs = ints(1..=8);
    let mut ws = WorkingSet::new();

    let mut plain = IndexScan::new(build_index(&docs), IndexScanParams::new(simple_range(1, 8, true)), None);
    let expected = drain(&mut plain, &mut ws);

    let mut yielding = IndexScan::new(build_index(&docs), IndexScanParams::new(simple_range(1, 8, true)), None);
    let mut out = Vec::new();
    while let Some(result) = step(&mut yielding, &mut ws) {
        out.extend(result);
        yielding.save_state();
        yielding.restore_state().unwrap();
    }
    assert_eq!(out, expected);
    assert_eq!(yielding.stats().common.yields, yielding.stats().common.unyields);
}

#[test]
fn test_delete_under_cursor_during_yield() {
    let docs = ints(1..=5);
    let index = build_index(&docs);
    let mut ws = WorkingSet::new();
    let mut stage = IndexScan::new(index.clone(), IndexScanParams::new(simple_range(1, 5, true)), None);

    let mut out = Vec::new();
    while out.len() < 2 {
        if let Some(Some(r)) = step(&mut stage, &mut ws) {
            out.push(r);
        }
    }

    // The cursor rests on a=3; delete it while yielded.
    stage.save_state();
    index.remove_document(&docs[2], RecordId::new(3)).unwrap();
    stage.restore_state().unwrap();

    out.extend(drain(&mut stage, &mut ws));
    assert_eq!(keys(&out), vec![1, 2, 4, 5]);
    match stage.stats().specific {
        SpecificStats::IndexScan(s) => assert_eq!(s.yield_moved_cursor, 1),
        other => panic!("unexpected stats {:?}", other),
    }
}

#[test]
fn test_write_conflicts_become_need_yield() {
    let index = build_index(&ints(1..=4));
    let mut ws = WorkingSet::new();
    let mut stage = IndexScan::new(index.clone(), IndexScanParams::new(simple_range(1, 4, true)), None);

    // Let the scan start, then make the next reads conflict.
    let mut out = Vec::new();
    while out.is_empty() {
        if let Some(Some(r)) = step(&mut stage, &mut ws) {
            out.push(r);
        }
    }
    index.inject_write_conflicts(2);
    out.extend(drain(&mut stage, &mut ws));

    assert_eq!(keys(&out), vec![1, 2, 3, 4]);
    assert!(stage.stats().common.need_yield >= 1);
}
