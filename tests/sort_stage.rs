//! Sort stage tests
//!
//! - Output follows the sort pattern whatever the input order
//! - A limit keeps only the best results
//! - Array fields sort by the key the query selects
//! - The memory cap fails the stage
//! - Buffered results survive invalidation

use std::sync::Arc;

use aeroexec::document::Direction;
use aeroexec::exec::{
    CollectionScan, ComputedData, InvalidationType, PlanStage, QueuedDataStage, SortPattern,
    SortStage, SortStageParams, SpecificStats, StageState, WorkingSet, WorkingSetMember,
};
use aeroexec::matcher::Predicate;
use aeroexec::storage::{ExtentCollection, RecordId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn collection_of(docs: &[Value]) -> Arc<ExtentCollection> {
    let collection = ExtentCollection::new(16);
    for doc in docs {
        collection.insert(doc.clone()).unwrap();
    }
    Arc::new(collection)
}

fn sort_over_scan(collection: Arc<ExtentCollection>, pattern: Value, limit: usize) -> SortStage {
    let mut params = SortStageParams::new(SortPattern::from_json(&pattern).unwrap());
    params.limit = limit;
    let scan = CollectionScan::new(collection, Direction::Forward, None);
    SortStage::new(params, Box::new(scan))
}

fn drain(stage: &mut dyn PlanStage, ws: &mut WorkingSet) -> Vec<Value> {
    let mut out = Vec::new();
    loop {
        match stage.work(ws).unwrap() {
            StageState::Advanced(id) => {
                out.push(ws.get(id).unwrap().obj().unwrap().clone());
                ws.unflag(id);
                ws.free(id).unwrap();
            }
            StageState::IsEof => return out,
            StageState::Failure(f) => panic!("unexpected failure: {}", f),
            _ => {}
        }
    }
}

fn field(docs: &[Value], name: &str) -> Vec<i64> {
    docs.iter().map(|d| d[name].as_i64().unwrap()).collect()
}

fn shuffled(n: i64, seed: u64) -> Vec<Value> {
    let mut values: Vec<i64> = (0..n).collect();
    values.shuffle(&mut StdRng::seed_from_u64(seed));
    values.into_iter().map(|a| json!({ "a": a })).collect()
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_shuffled_input_sorted_ascending() {
    let mut ws = WorkingSet::new();
    let mut stage = sort_over_scan(collection_of(&shuffled(200, 7)), json!({"a": 1}), 0);
    let out = drain(&mut stage, &mut ws);
    assert_eq!(field(&out, "a"), (0..200).collect::<Vec<_>>());
    assert!(ws.is_empty());
}

#[test]
fn test_shuffled_input_sorted_descending() {
    let mut ws = WorkingSet::new();
    let mut stage = sort_over_scan(collection_of(&shuffled(50, 11)), json!({"a": -1}), 0);
    let out = drain(&mut stage, &mut ws);
    assert_eq!(field(&out, "a"), (0..50).rev().collect::<Vec<_>>());
}

#[test]
fn test_compound_pattern_mixed_directions() {
    let docs = vec![
        json!({"a": 1, "b": 1}),
        json!({"a": 2, "b": 5}),
        json!({"a": 1, "b": 3}),
        json!({"a": 2, "b": 4}),
    ];
    let mut ws = WorkingSet::new();
    let mut stage = sort_over_scan(collection_of(&docs), json!({"a": 1, "b": -1}), 0);
    let out = drain(&mut stage, &mut ws);
    assert_eq!(field(&out, "b"), vec![3, 1, 5, 4]);
}

#[test]
fn test_missing_field_sorts_as_null() {
    let docs = vec![json!({"a": 2}), json!({"b": 1}), json!({"a": "x"})];
    let mut ws = WorkingSet::new();
    let mut stage = sort_over_scan(collection_of(&docs), json!({"a": 1}), 0);
    let out = drain(&mut stage, &mut ws);
    assert_eq!(out, vec![json!({"b": 1}), json!({"a": 2}), json!({"a": "x"})]);
}

#[test]
fn test_text_score_sorts_descending() {
    let mut child = QueuedDataStage::new();
    for (i, score) in [0.5, 2.0, 1.25].iter().enumerate() {
        let mut member = WorkingSetMember::default();
        member.set_owned_obj(Some(RecordId::new(i as u64 + 1)), json!({"n": i}));
        member.add_computed(ComputedData::TextScore(*score));
        child.push_back(member);
    }
    let pattern = SortPattern::from_json(&json!({"score": {"$meta": "textScore"}})).unwrap();
    let mut stage = SortStage::new(SortStageParams::new(pattern), Box::new(child));

    let mut ws = WorkingSet::new();
    let out = drain(&mut stage, &mut ws);
    assert_eq!(field(&out, "n"), vec![1, 2, 0]);
}

// =============================================================================
// Array Keys
// =============================================================================

#[test]
fn test_array_uses_smallest_element_without_query() {
    let docs = vec![json!({"a": [5, 1], "n": 1}), json!({"a": 4, "n": 2}), json!({"a": [0, 6], "n": 3})];
    let mut ws = WorkingSet::new();
    let mut stage = sort_over_scan(collection_of(&docs), json!({"a": 1}), 0);
    assert_eq!(field(&drain(&mut stage, &mut ws), "n"), vec![3, 1, 2]);
}

#[test]
fn test_array_key_narrowed_by_query() {
    let docs = vec![json!({"a": [5, 1], "n": 1}), json!({"a": 4, "n": 2}), json!({"a": [0, 6], "n": 3})];
    let mut params = SortStageParams::new(SortPattern::from_json(&json!({"a": 1})).unwrap());
    params.query = vec![Predicate::gte("a", json!(3))];
    let scan = CollectionScan::new(collection_of(&docs), Direction::Forward, None);
    let mut stage = SortStage::new(params, Box::new(scan));

    let mut ws = WorkingSet::new();
    assert_eq!(field(&drain(&mut stage, &mut ws), "n"), vec![2, 1, 3]);
}

// =============================================================================
// Limits
// =============================================================================

#[test]
fn test_top_k_matches_full_sort_prefix() {
    for limit in [1usize, 3, 10] {
        let mut ws = WorkingSet::new();
        let mut stage = sort_over_scan(collection_of(&shuffled(100, 42)), json!({"a": -1}), limit);
        let out = drain(&mut stage, &mut ws);
        let expected: Vec<i64> = (0..100).rev().take(limit).collect();
        assert_eq!(field(&out, "a"), expected, "limit {}", limit);
        assert!(ws.is_empty(), "limit {} left members allocated", limit);
    }
}

#[test]
fn test_memory_cap_fails_and_stays_failed() {
    let docs: Vec<Value> = (0..20).map(|i| json!({"a": i, "pad": "0123456789abcdef"})).collect();
    let mut params = SortStageParams::new(SortPattern::from_json(&json!({"a": 1})).unwrap());
    params.max_bytes = 200;
    let scan = CollectionScan::new(collection_of(&docs), Direction::Forward, None);
    let mut stage = SortStage::new(params, Box::new(scan));

    let mut ws = WorkingSet::new();
    let mut first_failure = None;
    for _ in 0..100 {
        match stage.work(&mut ws).unwrap() {
            StageState::Failure(f) => {
                first_failure = Some(f);
                break;
            }
            StageState::Advanced(_) => panic!("sort emitted a result before failing"),
            _ => {}
        }
    }
    let failure = first_failure.expect("sort should fail over its memory cap");
    assert_eq!(failure.stage, "SORT");
    assert!(matches!(stage.work(&mut ws).unwrap(), StageState::Failure(_)));

    match stage.stats().specific {
        SpecificStats::Sort(s) => assert!(s.mem_usage > s.mem_limit),
        other => panic!("unexpected stats {:?}", other),
    }
}

// =============================================================================
// Invalidation
// =============================================================================

#[test]
fn test_deleted_buffered_record_still_returned() {
    let collection = collection_of(&[json!({"a": 3}), json!({"a": 1}), json!({"a": 2})]);
    let mut stage = sort_over_scan(collection.clone(), json!({"a": 1}), 0);
    let mut ws = WorkingSet::new();

    // Initialize and buffer all three.
    for _ in 0..4 {
        assert_eq!(stage.work(&mut ws).unwrap(), StageState::NeedTime);
    }

    let doomed = RecordId::new(2);
    stage.save_state();
    stage.invalidate(&mut ws, doomed, InvalidationType::Deletion).unwrap();
    collection.remove(doomed).unwrap();
    stage.restore_state().unwrap();

    let mut emitted = Vec::new();
    loop {
        match stage.work(&mut ws).unwrap() {
            StageState::Advanced(id) => {
                let member = ws.get(id).unwrap();
                emitted.push((member.obj().unwrap()["a"].as_i64().unwrap(), member.loc()));
            }
            StageState::IsEof => break,
            _ => {}
        }
    }
    assert_eq!(
        emitted,
        vec![(1, None), (2, Some(RecordId::new(3))), (3, Some(RecordId::new(1)))]
    );
    match stage.stats().specific {
        SpecificStats::Sort(s) => assert_eq!(s.forced_fetches, 1),
        other => panic!("unexpected stats {:?}", other),
    }
}

#[test]
fn test_invalidating_unknown_location_is_noop() {
    let mut stage = sort_over_scan(collection_of(&[json!({"a": 1})]), json!({"a": 1}), 0);
    let mut ws = WorkingSet::new();
    stage
        .invalidate(&mut ws, RecordId::new(99), InvalidationType::Mutation)
        .unwrap();
    assert_eq!(field(&drain(&mut stage, &mut ws), "a"), vec![1]);
}
