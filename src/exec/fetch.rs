//! Fetch stage
//!
//! Turns index results into full documents. Records that are not resident
//! are reported with `NeedFetch` so the caller can page them in without
//! holding the snapshot open.

use std::sync::Arc;

use crate::matcher::MatchExpression;
use crate::storage::{RecordId, RecordStore};

use super::errors::{ExecError, ExecResult};
use super::plan_stage::{BoxedStage, InvalidationType, PlanStage, StageState};
use super::stats::{CommonStats, FetchStats, PlanStageStats, SpecificStats, StageType};
use super::working_set::{WorkingSet, WorkingSetID};

/// Fetches documents for the locations its child returns.
pub struct FetchStage {
    child: BoxedStage,
    store: Arc<dyn RecordStore>,
    filter: Option<MatchExpression>,
    // Member waiting on a NeedFetch or a write conflict
    pending: Option<WorkingSetID>,
    common: CommonStats,
    specific: FetchStats,
}

impl FetchStage {
    /// Creates a fetch over `child`
    pub fn new(child: BoxedStage, store: Arc<dyn RecordStore>, filter: Option<MatchExpression>) -> Self {
        Self {
            child,
            store,
            filter,
            pending: None,
            common: CommonStats::default(),
            specific: FetchStats::default(),
        }
    }

    fn fetch(&mut self, ws: &mut WorkingSet, id: WorkingSetID) -> ExecResult<StageState> {
        let Some(loc) = ws.get(id)?.loc() else {
            return Err(ExecError::invariant(format!("fetch of {} without a location", id)));
        };

        let view = match self.store.fetch(loc) {
            Ok(view) => view,
            Err(err) if err.is_write_conflict() => {
                self.pending = Some(id);
                return Ok(StageState::NeedYield);
            }
            Err(err) => return Err(err.into()),
        };

        // Deleted since the index entry was read.
        let Some(view) = view else {
            ws.free(id)?;
            return Ok(StageState::NeedTime);
        };

        self.specific.docs_examined += 1;
        ws.get_mut(id)?.set_unowned_obj(loc, view);
        self.filter_and_return(ws, id)
    }

    fn filter_and_return(&mut self, ws: &mut WorkingSet, id: WorkingSetID) -> ExecResult<StageState> {
        if let Some(filter) = &self.filter {
            self.specific.match_tested += 1;
            let matched = ws.get(id)?.obj().map(|doc| filter.matches(doc)).unwrap_or(false);
            if !matched {
                ws.unflag(id);
                ws.free(id)?;
                return Ok(StageState::NeedTime);
            }
        }
        Ok(StageState::Advanced(id))
    }

    fn step(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        if let Some(id) = self.pending.take() {
            if ws.get(id)?.has_obj() {
                return self.filter_and_return(ws, id);
            }
            return self.fetch(ws, id);
        }
        if self.is_eof() {
            return Ok(StageState::IsEof);
        }

        match self.child.work(ws)? {
            StageState::Advanced(id) => {
                let member = ws.get(id)?;
                if member.has_obj() {
                    self.specific.already_has_obj += 1;
                    return self.filter_and_return(ws, id);
                }
                let Some(loc) = member.loc() else {
                    return Err(ExecError::invariant(format!(
                        "fetch received {} in state {}",
                        id,
                        member.state_name()
                    )));
                };
                if self.store.needs_fetch(loc) {
                    self.pending = Some(id);
                    return Ok(StageState::NeedFetch(id));
                }
                self.fetch(ws, id)
            }
            other => Ok(other),
        }
    }
}

impl PlanStage for FetchStage {
    fn work(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let state = self.step(ws)?;
        Ok(self.common.record(state))
    }

    fn is_eof(&self) -> bool {
        self.pending.is_none() && self.child.is_eof()
    }

    fn invalidate(&mut self, ws: &mut WorkingSet, loc: RecordId, kind: InvalidationType) -> ExecResult<()> {
        self.common.invalidates += 1;
        self.child.invalidate(ws, loc, kind)?;

        if kind != InvalidationType::Deletion {
            return Ok(());
        }
        let Some(id) = self.pending else {
            return Ok(());
        };
        if ws.get(id)?.loc() != Some(loc) {
            return Ok(());
        }

        // Read the record now, while it still exists. The member is returned
        // flagged on the next call.
        match self.store.fetch(loc)? {
            Some(view) => {
                self.specific.forced_fetches += 1;
                ws.get_mut(id)?.set_owned_obj(None, view.to_owned_document());
                ws.flag_for_review(id)?;
            }
            None => {
                self.pending = None;
                ws.free(id)?;
            }
        }
        Ok(())
    }

    fn save_state(&mut self) {
        self.common.yields += 1;
        self.child.save_state();
    }

    fn restore_state(&mut self) -> ExecResult<()> {
        self.common.unyields += 1;
        self.child.restore_state()
    }

    fn stage_type(&self) -> StageType {
        StageType::Fetch
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(
            StageType::Fetch,
            self.common.clone(),
            SpecificStats::Fetch(self.specific.clone()),
        )
        .with_child(self.child.stats())
    }
}
