//! Oplog start stage
//!
//! Finds where forward replay of an insertion-ordered log should begin: the
//! newest record satisfying a `ts <= target` style predicate. It first scans
//! backwards from the newest record. If that takes longer than its time
//! budget it hops over whole extents instead, newest first, testing only the
//! oldest record of each. The first extent whose oldest record matches holds
//! the answer, and is walked forward to find it.
//!
//! The predicate must be monotonic in insertion order: once a record fails
//! it, every newer record fails it too.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::document::Direction;
use crate::matcher::MatchExpression;
use crate::observability::Logger;
use crate::storage::{Record, RecordCursor, RecordId, RecordStore};

use super::collection_scan::CollectionScan;
use super::errors::{ExecError, ExecResult};
use super::plan_stage::{InvalidationType, PlanStage, StageState};
use super::stats::{CommonStats, OplogStartStats, PlanStageStats, SpecificStats, StageType};
use super::working_set::{WorkingSet, WorkingSetMember};

/// Default time spent scanning backwards before hopping extents
pub const DEFAULT_BACKWARDS_SCAN_TIME: Duration = Duration::from_secs(5);

enum Phase {
    NeedInit,
    BackwardsScanning { scan: CollectionScan, started: Instant },
    ExtentHopping,
    // Walking forward through the extent that holds the answer. The
    // candidate is owned across yields and loses its location once the
    // record is deleted.
    Refining {
        cursor: Option<Box<dyn RecordCursor>>,
        candidate: WorkingSetMember,
    },
    Done,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::NeedInit => "NEED_INIT",
            Phase::BackwardsScanning { .. } => "BACKWARDS_SCANNING",
            Phase::ExtentHopping => "EXTENT_HOPPING",
            Phase::Refining { .. } => "REFINING",
            Phase::Done => "DONE",
        }
    }
}

fn candidate_from(record: Record) -> WorkingSetMember {
    let mut member = WorkingSetMember::default();
    member.set_unowned_obj(record.id, record.data);
    member
}

/// Locates the starting point for replaying an oplog.
pub struct OplogStart {
    store: Arc<dyn RecordStore>,
    filter: MatchExpression,
    backwards_scan_time: Duration,
    phase: Phase,
    // Extent cursors, oldest first; the newest is worked on
    sub_iterators: Vec<Box<dyn RecordCursor>>,
    common: CommonStats,
    specific: OplogStartStats,
}

impl OplogStart {
    /// Creates the stage. `filter` selects records at or before the target.
    pub fn new(store: Arc<dyn RecordStore>, filter: MatchExpression, backwards_scan_time: Duration) -> Self {
        Self {
            store,
            filter,
            backwards_scan_time,
            phase: Phase::NeedInit,
            sub_iterators: Vec::new(),
            common: CommonStats::default(),
            specific: OplogStartStats::default(),
        }
    }

    /// Name of the current phase
    pub fn phase_name(&self) -> &'static str {
        self.phase.name()
    }

    /// Returns true once the stage has given up on the backward scan
    pub fn is_extent_hopping(&self) -> bool {
        matches!(self.phase, Phase::ExtentHopping | Phase::Refining { .. })
    }

    fn step(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        if let Phase::NeedInit = self.phase {
            self.phase = Phase::BackwardsScanning {
                scan: CollectionScan::new(Arc::clone(&self.store), Direction::Backward, None),
                started: Instant::now(),
            };
        }

        if let Phase::BackwardsScanning { started, .. } = &self.phase {
            if started.elapsed() < self.backwards_scan_time {
                return self.work_backwards_scan(ws);
            }
            // A conflict leaves us scanning backwards; the switch is retried
            // on the next call.
            match self.store.extent_cursors() {
                Ok(cursors) => self.sub_iterators = cursors,
                Err(err) if err.is_write_conflict() => {
                    self.sub_iterators.clear();
                    return Ok(StageState::NeedYield);
                }
                Err(err) => return Err(err.into()),
            }
            Logger::info(
                "OPLOG_START_EXTENT_HOPPING",
                &[
                    ("budget_ms", &self.backwards_scan_time.as_millis().to_string()),
                    ("docs_tested", &self.specific.docs_tested.to_string()),
                    ("extents", &self.sub_iterators.len().to_string()),
                ],
            );
            self.phase = Phase::ExtentHopping;
        }

        match self.phase {
            Phase::ExtentHopping => self.work_extent_hopping(),
            Phase::Refining { .. } => self.work_refining(ws),
            Phase::Done => Ok(StageState::IsEof),
            _ => Err(ExecError::invariant(format!(
                "oplog start worked in phase {}",
                self.phase.name()
            ))),
        }
    }

    fn work_backwards_scan(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let Phase::BackwardsScanning { scan, .. } = &mut self.phase else {
            return Err(ExecError::invariant("backward scan without a collection scan"));
        };

        let id = match scan.work(ws)? {
            StageState::Advanced(id) => id,
            // Everything is newer than the target: start from the beginning.
            StageState::IsEof => {
                self.phase = Phase::Done;
                return Ok(StageState::IsEof);
            }
            other => return Ok(other),
        };

        let member = ws.get(id)?;
        let Some(doc) = member.obj().filter(|_| member.has_loc()) else {
            return Err(ExecError::invariant(format!(
                "collection scan returned {} in state {}",
                id,
                member.state_name()
            )));
        };

        self.specific.docs_tested += 1;
        if self.filter.matches(doc) {
            self.phase = Phase::Done;
            return Ok(StageState::Advanced(id));
        }
        ws.free(id)?;
        Ok(StageState::NeedTime)
    }

    fn work_extent_hopping(&mut self) -> ExecResult<StageState> {
        let Some(cursor) = self.sub_iterators.last_mut() else {
            self.phase = Phase::Done;
            return Ok(StageState::IsEof);
        };

        let first = match cursor.next() {
            Ok(first) => first,
            Err(err) if err.is_write_conflict() => return Ok(StageState::NeedYield),
            Err(err) => return Err(err.into()),
        };

        if let Some(record) = first {
            self.specific.docs_tested += 1;
            if self.filter.matches(record.data.document()) {
                if let Some(cursor) = self.sub_iterators.pop() {
                    self.sub_iterators.clear();
                    self.phase = Phase::Refining {
                        cursor: Some(cursor),
                        candidate: candidate_from(record),
                    };
                }
                return Ok(StageState::NeedTime);
            }
        }

        // Every record in this extent is newer than the target.
        self.sub_iterators.pop();
        self.specific.extents_skipped += 1;
        Ok(StageState::NeedTime)
    }

    fn work_refining(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let Phase::Refining { cursor, candidate } = &mut self.phase else {
            return Err(ExecError::invariant("refining without an extent cursor"));
        };

        let next = match cursor.as_mut() {
            Some(cursor) => cursor.next(),
            None => Ok(None),
        };
        match next {
            Ok(Some(record)) => {
                self.specific.docs_tested += 1;
                if self.filter.matches(record.data.document()) {
                    *candidate = candidate_from(record);
                    return Ok(StageState::NeedTime);
                }
            }
            Ok(None) => {}
            Err(err) if err.is_write_conflict() => return Ok(StageState::NeedYield),
            Err(err) => return Err(err.into()),
        }

        let Phase::Refining { candidate, .. } = std::mem::replace(&mut self.phase, Phase::Done) else {
            return Err(ExecError::invariant("refining without a candidate"));
        };
        let id = ws.allocate();
        *ws.get_mut(id)? = candidate;
        Ok(StageState::Advanced(id))
    }
}

impl PlanStage for OplogStart {
    fn work(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let state = self.step(ws)?;
        Ok(self.common.record(state))
    }

    fn is_eof(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    fn invalidate(&mut self, ws: &mut WorkingSet, loc: RecordId, kind: InvalidationType) -> ExecResult<()> {
        self.common.invalidates += 1;
        if matches!(self.phase, Phase::NeedInit) || kind != InvalidationType::Deletion {
            return Ok(());
        }

        match &mut self.phase {
            Phase::BackwardsScanning { scan, .. } => scan.invalidate(ws, loc, kind)?,
            Phase::Refining { cursor, candidate } => {
                if let Some(cursor) = cursor.as_mut() {
                    cursor.invalidate(loc);
                }
                if candidate.loc() == Some(loc) {
                    candidate.fetch_and_invalidate()?;
                }
            }
            _ => {}
        }
        for cursor in self.sub_iterators.iter_mut() {
            cursor.invalidate(loc);
        }
        Ok(())
    }

    fn save_state(&mut self) {
        self.common.yields += 1;
        match &mut self.phase {
            Phase::BackwardsScanning { scan, .. } => scan.save_state(),
            Phase::Refining { cursor, candidate } => {
                if let Some(cursor) = cursor.as_mut() {
                    cursor.save();
                }
                candidate.make_owned();
            }
            _ => {}
        }
        for cursor in self.sub_iterators.iter_mut() {
            cursor.save();
        }
    }

    fn restore_state(&mut self) -> ExecResult<()> {
        self.common.unyields += 1;
        match &mut self.phase {
            Phase::BackwardsScanning { scan, .. } => scan.restore_state()?,
            Phase::Refining { cursor, candidate } => {
                // Extent dropped: nothing newer can be found. The candidate
                // went with it, so it is answered without a location.
                if let Some(c) = cursor.as_mut() {
                    if !c.restore()? {
                        *cursor = None;
                        candidate.fetch_and_invalidate()?;
                    }
                }
            }
            _ => {}
        }

        let mut kept = Vec::with_capacity(self.sub_iterators.len());
        for mut cursor in self.sub_iterators.drain(..) {
            if cursor.restore()? {
                kept.push(cursor);
            } else {
                self.specific.extents_skipped += 1;
            }
        }
        self.sub_iterators = kept;
        Ok(())
    }

    fn stage_type(&self) -> StageType {
        StageType::OplogStart
    }

    fn stats(&self) -> PlanStageStats {
        let mut specific = self.specific.clone();
        specific.phase = self.phase.name().to_string();
        let stats = PlanStageStats::new(
            StageType::OplogStart,
            self.common.clone(),
            SpecificStats::OplogStart(specific),
        );
        match &self.phase {
            Phase::BackwardsScanning { scan, .. } => stats.with_child(scan.stats()),
            _ => stats,
        }
    }
}
