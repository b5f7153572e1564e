//! Query execution subsystem
//!
//! A query plan is a tree of stages. The executor pulls results from the
//! root one `work()` call at a time; each stage pulls from its children the
//! same way. Candidate results live in a `WorkingSet` shared by the tree and
//! are passed between stages by `WorkingSetID`.
//!
//! # Stages
//!
//! - `IndexScan`: index entries within bounds
//! - `FetchStage`: full documents for index entries
//! - `CollectionScan`: every record in location order
//! - `SortStage`: blocking sort with optional limit and a memory cap
//! - `OplogStart`: where to begin replaying an insertion-ordered log
//! - `QueuedDataStage`: scripted results
//!
//! # Yielding
//!
//! Storage write conflicts surface as `StageState::NeedYield`. The caller
//! then calls `save_state()`, lets the snapshot go, and calls
//! `restore_state()` before working again. Records about to be deleted or
//! changed are announced through `invalidate()`.

mod collection_scan;
mod context;
mod errors;
mod executor;
mod fetch;
mod index_scan;
mod oplog_start;
mod plan_stage;
mod queued_data;
mod result;
mod sort;
mod sort_key;
mod stats;
mod working_set;

pub use collection_scan::CollectionScan;
pub use context::{KillHandle, OperationContext};
pub use errors::{ExecError, ExecErrorCode, ExecResult, Severity};
pub use executor::PlanExecutor;
pub use fetch::FetchStage;
pub use index_scan::{IndexScan, IndexScanParams};
pub use oplog_start::{OplogStart, DEFAULT_BACKWARDS_SCAN_TIME};
pub use plan_stage::{BoxedStage, InvalidationType, PlanStage, StageFailure, StageState};
pub use queued_data::QueuedDataStage;
pub use result::{ExecutionResult, ResultDocument};
pub use sort::{SortStage, SortStageParams, DEFAULT_SORT_MAX_BYTES};
pub use sort_key::{SortPattern, SortStageKeyGenerator, SortTerm};
pub use stats::{
    CollectionScanStats, CommonStats, FetchStats, IndexScanStats, OplogStartStats, PlanStageStats,
    SortStats, SpecificStats, StageType,
};
pub use working_set::{
    ComputedData, ComputedDataKind, IndexKeyDatum, MemberState, WorkingSet, WorkingSetID,
    WorkingSetMember,
};
