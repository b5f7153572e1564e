//! Results handed out by the plan executor

use serde::Serialize;
use serde_json::Value;

use crate::storage::RecordId;

use super::stats::PlanStageStats;

/// A single result document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultDocument {
    /// Location the document was read from, if it still has one
    pub loc: Option<RecordId>,
    /// Document body, or the index key projection for index-only results
    pub body: Value,
    /// The document was materialized because its record was invalidated
    pub flagged: bool,
}

impl ResultDocument {
    /// Creates a result document
    pub fn new(loc: Option<RecordId>, body: Value, flagged: bool) -> Self {
        Self { loc, body, flagged }
    }

    /// Returns the document body
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Result of running a plan to completion
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Documents in result order
    pub documents: Vec<ResultDocument>,
    /// `work()` calls made on the root
    pub works: u64,
    /// Yields performed, requested or periodic
    pub yields: u64,
    /// Records paged in on behalf of the plan
    pub fetch_requests: u64,
    /// Statistics of the plan at EOF
    pub stats: PlanStageStats,
}

impl ExecutionResult {
    /// Returns true if no documents were returned
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns the number of results
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns an iterator over the documents
    pub fn iter(&self) -> impl Iterator<Item = &ResultDocument> {
        self.documents.iter()
    }

    /// Document bodies in order
    pub fn bodies(&self) -> Vec<Value> {
        self.documents.iter().map(|d| d.body.clone()).collect()
    }
}
