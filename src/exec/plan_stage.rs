//! The plan stage protocol
//!
//! A plan is a tree of stages pulled from the root. Each `work()` call does a
//! bounded amount of work and reports what happened through `StageState`.
//! The working set is lent to every call; stages keep only IDs.

use std::fmt;

use crate::storage::RecordId;

use super::errors::ExecResult;
use super::stats::{PlanStageStats, StageType};
use super::working_set::{WorkingSet, WorkingSetID};

/// Why a stage gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Stage that failed
    pub stage: &'static str,
    /// Human-readable reason
    pub reason: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

/// Outcome of one `work()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    /// A result is ready
    Advanced(WorkingSetID),
    /// No more results, ever
    IsEof,
    /// Work was done but nothing is ready; call again
    NeedTime,
    /// The member's record must be paged in before calling again
    NeedFetch(WorkingSetID),
    /// Release the storage snapshot, then retry
    NeedYield,
    /// Unrecoverable; the query must abort
    Failure(StageFailure),
}

impl StageState {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            StageState::Advanced(_) => "ADVANCED",
            StageState::IsEof => "IS_EOF",
            StageState::NeedTime => "NEED_TIME",
            StageState::NeedFetch(_) => "NEED_FETCH",
            StageState::NeedYield => "NEED_YIELD",
            StageState::Failure(_) => "FAILURE",
        }
    }
}

/// What happened to an invalidated location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationType {
    /// The record is about to be deleted
    Deletion,
    /// The record is about to change in place
    Mutation,
}

/// A node of an execution plan.
///
/// Errors returned from these methods abort the whole tree. Storage write
/// conflicts are never returned as errors; stages turn them into
/// `StageState::NeedYield`.
pub trait PlanStage: Send {
    /// Does one unit of work
    fn work(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState>;

    /// Returns true once no more results can be produced
    fn is_eof(&self) -> bool;

    /// `loc` is about to become unusable. Must propagate to children.
    fn invalidate(&mut self, ws: &mut WorkingSet, loc: RecordId, kind: InvalidationType) -> ExecResult<()>;

    /// Checkpoints cursor positions ahead of a yield. Must propagate to children.
    fn save_state(&mut self);

    /// Repositions after a yield. Must propagate to children.
    fn restore_state(&mut self) -> ExecResult<()>;

    /// Kind of stage
    fn stage_type(&self) -> StageType;

    /// Statistics for this stage and its children
    fn stats(&self) -> PlanStageStats;
}

/// Owned child stage
pub type BoxedStage = Box<dyn PlanStage>;
