//! Stage that replays a fixed script of results
//!
//! Used as a leaf under other stages when results are produced elsewhere,
//! and in tests to drive parents through every state.

use std::collections::VecDeque;

use crate::storage::RecordId;

use super::errors::ExecResult;
use super::plan_stage::{InvalidationType, PlanStage, StageState};
use super::stats::{CommonStats, PlanStageStats, SpecificStats, StageType};
use super::working_set::{WorkingSet, WorkingSetMember};

enum QueuedItem {
    State(StageState),
    Member(WorkingSetMember),
}

/// Returns queued states and members in order, then EOF.
#[derive(Default)]
pub struct QueuedDataStage {
    queue: VecDeque<QueuedItem>,
    common: CommonStats,
}

impl QueuedDataStage {
    /// Creates an empty stage
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a member, allocated into the working set when it is returned.
    pub fn push_back(&mut self, member: WorkingSetMember) {
        self.queue.push_back(QueuedItem::Member(member));
    }

    /// Queues a bare state. `Advanced` should use `push_back` instead.
    pub fn push_back_state(&mut self, state: StageState) {
        self.queue.push_back(QueuedItem::State(state));
    }

    /// Number of queued items
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl PlanStage for QueuedDataStage {
    fn work(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let state = match self.queue.pop_front() {
            None => StageState::IsEof,
            Some(QueuedItem::State(state)) => state,
            Some(QueuedItem::Member(member)) => {
                let id = ws.allocate();
                *ws.get_mut(id)? = member;
                StageState::Advanced(id)
            }
        };
        Ok(self.common.record(state))
    }

    fn is_eof(&self) -> bool {
        self.queue.is_empty()
    }

    fn invalidate(&mut self, _ws: &mut WorkingSet, _loc: RecordId, _kind: InvalidationType) -> ExecResult<()> {
        self.common.invalidates += 1;
        Ok(())
    }

    fn save_state(&mut self) {
        self.common.yields += 1;
    }

    fn restore_state(&mut self) -> ExecResult<()> {
        self.common.unyields += 1;
        Ok(())
    }

    fn stage_type(&self) -> StageType {
        StageType::QueuedData
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::QueuedData, self.common.clone(), SpecificStats::None)
    }
}
