//! Collection scan stage
//!
//! Walks a record store in location order and emits `LocAndUnownedObj`
//! members, optionally filtered.

use std::sync::Arc;

use crate::document::Direction;
use crate::matcher::MatchExpression;
use crate::storage::{RecordCursor, RecordId, RecordStore};

use super::errors::ExecResult;
use super::plan_stage::{InvalidationType, PlanStage, StageState};
use super::stats::{CollectionScanStats, CommonStats, PlanStageStats, SpecificStats, StageType};
use super::working_set::WorkingSet;

/// Scans every record of a store.
pub struct CollectionScan {
    store: Arc<dyn RecordStore>,
    direction: Direction,
    filter: Option<MatchExpression>,
    cursor: Option<Box<dyn RecordCursor>>,
    is_dead: bool,
    hit_end: bool,
    common: CommonStats,
    specific: CollectionScanStats,
}

impl CollectionScan {
    /// Creates a scan; the cursor opens on the first `work()`.
    pub fn new(store: Arc<dyn RecordStore>, direction: Direction, filter: Option<MatchExpression>) -> Self {
        Self {
            store,
            direction,
            filter,
            cursor: None,
            is_dead: false,
            hit_end: false,
            common: CommonStats::default(),
            specific: CollectionScanStats {
                direction: direction.sign(),
                ..Default::default()
            },
        }
    }

    fn step(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        if self.is_eof() {
            return Ok(StageState::IsEof);
        }

        let direction = self.direction;
        let store = &self.store;
        let cursor = self.cursor.get_or_insert_with(|| store.cursor(direction));

        let record = match cursor.next() {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.hit_end = true;
                return Ok(StageState::IsEof);
            }
            Err(err) if err.is_write_conflict() => return Ok(StageState::NeedYield),
            Err(err) => return Err(err.into()),
        };

        self.specific.docs_tested += 1;
        if let Some(filter) = &self.filter {
            if !filter.matches(record.data.document()) {
                return Ok(StageState::NeedTime);
            }
        }

        let id = ws.allocate();
        ws.get_mut(id)?.set_unowned_obj(record.id, record.data);
        Ok(StageState::Advanced(id))
    }
}

impl PlanStage for CollectionScan {
    fn work(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let state = self.step(ws)?;
        Ok(self.common.record(state))
    }

    fn is_eof(&self) -> bool {
        self.hit_end || self.is_dead
    }

    fn invalidate(&mut self, _ws: &mut WorkingSet, loc: RecordId, kind: InvalidationType) -> ExecResult<()> {
        self.common.invalidates += 1;
        if kind == InvalidationType::Deletion {
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.invalidate(loc);
            }
        }
        Ok(())
    }

    fn save_state(&mut self) {
        self.common.yields += 1;
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.save();
        }
    }

    fn restore_state(&mut self) -> ExecResult<()> {
        self.common.unyields += 1;
        if let Some(cursor) = self.cursor.as_mut() {
            if !cursor.restore()? {
                self.is_dead = true;
            }
        }
        Ok(())
    }

    fn stage_type(&self) -> StageType {
        StageType::CollectionScan
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(
            StageType::CollectionScan,
            self.common.clone(),
            SpecificStats::CollectionScan(self.specific.clone()),
        )
    }
}
