//! Index scan stage
//!
//! Walks index entries inside simple-range or interval bounds in either
//! direction. The cursor always points one entry ahead of the last result,
//! so callers deleting the returned record never disturb the scan position.

use std::collections::HashSet;
use std::sync::Arc;

use crate::document::{Direction, KeyPattern};
use crate::index::{
    IndexBoundsChecker, IndexCursor, IndexEntry, KeyState, ScanBounds, SeekPoint,
    SortedDataInterface,
};
use crate::matcher::{IndexKeyMatchable, MatchExpression};
use crate::observability::Logger;
use crate::storage::RecordId;

use super::errors::{ExecError, ExecResult};
use super::plan_stage::{InvalidationType, PlanStage, StageState};
use super::stats::{CommonStats, IndexScanStats, PlanStageStats, SpecificStats, StageType};
use super::working_set::{ComputedData, IndexKeyDatum, WorkingSet};

/// Parameters of an index scan
#[derive(Debug, Clone)]
pub struct IndexScanParams {
    /// Range of the index to cover
    pub bounds: ScanBounds,
    /// Scan direction
    pub direction: Direction,
    /// Stop after examining this many keys; 0 means no cap
    pub max_scan: u64,
    /// Attach the key as `ComputedData::IndexKey`
    pub add_key_metadata: bool,
}

impl IndexScanParams {
    /// Forward scan over `bounds` with no cap
    pub fn new(bounds: ScanBounds) -> Self {
        Self {
            bounds,
            direction: Direction::Forward,
            max_scan: 0,
            add_key_metadata: false,
        }
    }
}

/// Scans an index and emits `LocAndIdx` members.
pub struct IndexScan {
    index: Arc<dyn SortedDataInterface>,
    index_name: String,
    key_pattern: Arc<KeyPattern>,
    params: IndexScanParams,
    filter: Option<MatchExpression>,
    cursor: Option<Box<dyn IndexCursor>>,
    checker: Option<IndexBoundsChecker>,
    should_dedup: bool,
    returned: HashSet<RecordId>,
    hit_end: bool,
    pending_end_check: bool,
    pending_restore: bool,
    saved: Option<IndexEntry>,
    common: CommonStats,
    specific: IndexScanStats,
}

impl IndexScan {
    /// Creates a scan over `index`. Nothing is read until the first `work()`.
    pub fn new(
        index: Arc<dyn SortedDataInterface>,
        params: IndexScanParams,
        filter: Option<MatchExpression>,
    ) -> Self {
        let descriptor = index.descriptor();
        let specific = IndexScanStats {
            index_name: descriptor.name.clone(),
            key_pattern: descriptor.key_pattern.to_string(),
            direction: params.direction.sign(),
            bounds: params.bounds.to_string(),
            is_multikey: descriptor.multikey,
            ..Default::default()
        };
        Self {
            index,
            index_name: descriptor.name,
            key_pattern: descriptor.key_pattern,
            params,
            filter,
            cursor: None,
            checker: None,
            should_dedup: descriptor.multikey,
            returned: HashSet::new(),
            hit_end: false,
            pending_end_check: false,
            pending_restore: false,
            saved: None,
            common: CommonStats::default(),
            specific,
        }
    }

    /// Opens and positions the cursor. A write conflict leaves the stage
    /// uninitialized so the next call retries.
    fn init_cursor(&mut self) -> ExecResult<bool> {
        let mut cursor = self.index.new_cursor(self.params.direction);

        let start = match &self.params.bounds {
            ScanBounds::SimpleRange { start_key, .. } => Some(SeekPoint::at_key(start_key)),
            ScanBounds::Intervals(bounds) => {
                let checker = IndexBoundsChecker::new(bounds, &self.key_pattern, self.params.direction);
                let start = checker.start_point();
                self.checker = Some(checker);
                start
            }
        };

        match start {
            Some(point) => match cursor.seek(&point) {
                Ok(()) => {}
                Err(err) if err.is_write_conflict() => return Ok(false),
                Err(err) => {
                    // Treated as an empty result rather than an error.
                    Logger::warn(
                        "INDEX_SEEK_FAILED",
                        &[("index", &self.index_name), ("error", &err.to_string())],
                    );
                    self.hit_end = true;
                }
            },
            None => self.hit_end = true,
        }

        self.cursor = Some(cursor);
        Ok(true)
    }

    /// Re-evaluates whether the cursor has left the bounds.
    ///
    /// Returns false if a write conflict interrupted the check; the check is
    /// then retried before the next read.
    fn check_end(&mut self) -> ExecResult<bool> {
        self.pending_end_check = false;
        if self.is_eof() {
            return Ok(true);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(ExecError::invariant("index scan checked bounds without a cursor"));
        };

        match &self.params.bounds {
            ScanBounds::SimpleRange {
                end_key,
                end_key_inclusive,
                ..
            } => {
                // An empty end key scans to the end of the index.
                if end_key.is_empty() {
                    return Ok(true);
                }
                let Some(current) = cursor.current() else {
                    return Ok(true);
                };
                let cmp = self.key_pattern.compare(end_key, &current.key) as i32;
                let dir = self.params.direction.sign();
                if (cmp != 0 && cmp != dir) || (cmp == 0 && !end_key_inclusive) {
                    self.hit_end = true;
                }
            }
            ScanBounds::Intervals(_) => {
                let Some(checker) = self.checker.as_ref() else {
                    return Err(ExecError::invariant("interval scan without a bounds checker"));
                };
                loop {
                    let Some(current) = cursor.current() else {
                        break;
                    };
                    match checker.check_key(&current.key) {
                        KeyState::Valid => break,
                        KeyState::Done => {
                            self.hit_end = true;
                            break;
                        }
                        KeyState::MustAdvance(point) => {
                            self.specific.keys_examined += 1;
                            match cursor.seek(&point) {
                                Ok(()) => {}
                                Err(err) if err.is_write_conflict() => {
                                    self.pending_end_check = true;
                                    return Ok(false);
                                }
                                Err(err) => return Err(err.into()),
                            }
                        }
                    }
                    if self.params.max_scan != 0 && self.specific.keys_examined >= self.params.max_scan {
                        break;
                    }
                }
            }
        }

        if self.is_eof() {
            self.common.is_eof = true;
        }
        Ok(true)
    }

    fn restore_cursor(&mut self) -> ExecResult<bool> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(true);
        };
        match cursor.restore_position() {
            Ok(()) => {}
            Err(err) if err.is_write_conflict() => {
                self.pending_restore = true;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }
        self.pending_restore = false;

        let moved = match (cursor.current(), self.saved.as_ref()) {
            (Some(current), Some(saved)) => current != saved,
            (None, _) => {
                self.hit_end = true;
                return Ok(true);
            }
            (Some(_), None) => true,
        };
        if moved {
            // Return the entry now under the cursor instead of skipping it.
            self.specific.yield_moved_cursor += 1;
            return self.check_end();
        }
        Ok(true)
    }

    fn step(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        if self.cursor.is_none() {
            if !self.init_cursor()? || !self.check_end()? {
                return Ok(StageState::NeedYield);
            }
        } else if self.pending_restore {
            if !self.restore_cursor()? {
                return Ok(StageState::NeedYield);
            }
        } else if self.pending_end_check {
            if !self.check_end()? {
                return Ok(StageState::NeedYield);
            }
        }

        if self.is_eof() {
            return Ok(StageState::IsEof);
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Err(ExecError::invariant("index scan advanced without a cursor"));
        };
        let Some(entry) = cursor.current().cloned() else {
            return Ok(StageState::IsEof);
        };

        // Move one ahead before handing out the current entry.
        match cursor.next() {
            Ok(()) => {}
            Err(err) if err.is_write_conflict() => return Ok(StageState::NeedYield),
            Err(err) => return Err(err.into()),
        }
        self.specific.keys_examined += 1;
        self.check_end()?;

        if self.should_dedup {
            self.specific.dups_tested += 1;
            if !self.returned.insert(entry.loc) {
                self.specific.dups_dropped += 1;
                return Ok(StageState::NeedTime);
            }
        }

        if let Some(filter) = &self.filter {
            self.specific.match_tested += 1;
            if !filter.matches(&IndexKeyMatchable::new(&self.key_pattern, &entry.key)) {
                return Ok(StageState::NeedTime);
            }
        }

        let id = ws.allocate();
        let member = ws.get_mut(id)?;
        if self.params.add_key_metadata {
            member.add_computed(ComputedData::IndexKey(self.key_pattern.key_to_json(&entry.key)));
        }
        member.set_loc_and_idx(
            entry.loc,
            vec![IndexKeyDatum::new(Arc::clone(&self.key_pattern), entry.key)],
        );
        Ok(StageState::Advanced(id))
    }
}

impl PlanStage for IndexScan {
    fn work(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let state = self.step(ws)?;
        Ok(self.common.record(state))
    }

    fn is_eof(&self) -> bool {
        let Some(cursor) = self.cursor.as_ref() else {
            return false;
        };
        if self.params.max_scan != 0 && self.specific.keys_examined >= self.params.max_scan {
            return true;
        }
        self.hit_end || cursor.is_eof()
    }

    fn invalidate(&mut self, _ws: &mut WorkingSet, loc: RecordId, kind: InvalidationType) -> ExecResult<()> {
        self.common.invalidates += 1;

        // A mutated record is repositioned by the index itself.
        if kind == InvalidationType::Mutation {
            return Ok(());
        }

        // A deleted location may come back as a different document.
        if self.returned.remove(&loc) {
            self.specific.seen_invalidated += 1;
        }
        Ok(())
    }

    fn save_state(&mut self) {
        self.common.yields += 1;
        if self.is_eof() || self.pending_restore {
            return;
        }
        if let Some(cursor) = self.cursor.as_mut() {
            self.saved = cursor.current().cloned();
            cursor.save_position();
        }
    }

    fn restore_state(&mut self) -> ExecResult<()> {
        self.common.unyields += 1;
        if self.is_eof() {
            return Ok(());
        }
        self.restore_cursor()?;
        Ok(())
    }

    fn stage_type(&self) -> StageType {
        StageType::IndexScan
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(
            StageType::IndexScan,
            self.common.clone(),
            SpecificStats::IndexScan(self.specific.clone()),
        )
    }
}
