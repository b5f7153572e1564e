//! Per-stage execution statistics
//!
//! Every stage keeps `CommonStats`; stages with interesting internals add a
//! `SpecificStats` variant. `PlanStageStats` assembles both into a tree for
//! explain output.

use std::fmt;

use serde::Serialize;

use super::plan_stage::StageState;

/// Kind of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageType {
    /// Index scan
    IndexScan,
    /// Blocking sort
    Sort,
    /// Collection scan
    CollectionScan,
    /// Fetch by location
    Fetch,
    /// Oplog start finder
    OplogStart,
    /// Scripted results
    QueuedData,
}

impl StageType {
    /// Explain name
    pub fn name(&self) -> &'static str {
        match self {
            StageType::IndexScan => "IXSCAN",
            StageType::Sort => "SORT",
            StageType::CollectionScan => "COLLSCAN",
            StageType::Fetch => "FETCH",
            StageType::OplogStart => "OPLOG_START",
            StageType::QueuedData => "QUEUED_DATA",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Counters every stage maintains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommonStats {
    pub works: u64,
    pub advanced: u64,
    pub need_time: u64,
    pub need_yield: u64,
    pub need_fetch: u64,
    pub yields: u64,
    pub unyields: u64,
    pub invalidates: u64,
    pub is_eof: bool,
}

impl CommonStats {
    /// Counts one `work()` call and the state it produced
    pub fn record(&mut self, state: StageState) -> StageState {
        self.works += 1;
        match &state {
            StageState::Advanced(_) => self.advanced += 1,
            StageState::NeedTime => self.need_time += 1,
            StageState::NeedYield => self.need_yield += 1,
            StageState::NeedFetch(_) => self.need_fetch += 1,
            StageState::IsEof => self.is_eof = true,
            StageState::Failure(_) => {}
        }
        state
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexScanStats {
    pub index_name: String,
    pub key_pattern: String,
    pub direction: i32,
    pub bounds: String,
    pub is_multikey: bool,
    pub keys_examined: u64,
    pub dups_tested: u64,
    pub dups_dropped: u64,
    pub seen_invalidated: u64,
    pub match_tested: u64,
    pub yield_moved_cursor: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SortStats {
    pub pattern: String,
    pub limit: usize,
    pub mem_usage: usize,
    pub mem_limit: usize,
    pub forced_fetches: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionScanStats {
    pub direction: i32,
    pub docs_tested: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchStats {
    pub already_has_obj: u64,
    pub forced_fetches: u64,
    pub docs_examined: u64,
    pub match_tested: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OplogStartStats {
    pub phase: String,
    pub extents_skipped: u64,
    pub docs_tested: u64,
}

/// Stage-specific counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SpecificStats {
    IndexScan(IndexScanStats),
    Sort(SortStats),
    CollectionScan(CollectionScanStats),
    Fetch(FetchStats),
    OplogStart(OplogStartStats),
    None,
}

/// Statistics tree for one stage and its children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStageStats {
    pub stage_type: StageType,
    pub common: CommonStats,
    pub specific: SpecificStats,
    pub children: Vec<PlanStageStats>,
}

impl PlanStageStats {
    /// Creates a stats node
    pub fn new(stage_type: StageType, common: CommonStats, specific: SpecificStats) -> Self {
        Self {
            stage_type,
            common,
            specific,
            children: Vec::new(),
        }
    }

    /// Adds a child node
    pub fn with_child(mut self, child: PlanStageStats) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first search for the first node of `stage_type`
    pub fn find(&self, stage_type: StageType) -> Option<&PlanStageStats> {
        if self.stage_type == stage_type {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(stage_type))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let c = &self.common;
        writeln!(
            f,
            "{}{} works={} advanced={} needTime={} needYield={} needFetch={} isEOF={}",
            pad, self.stage_type, c.works, c.advanced, c.need_time, c.need_yield, c.need_fetch, c.is_eof
        )?;
        match &self.specific {
            SpecificStats::IndexScan(s) => writeln!(
                f,
                "{}  index={} keyPattern={} bounds={} keysExamined={} dupsDropped={}",
                pad, s.index_name, s.key_pattern, s.bounds, s.keys_examined, s.dups_dropped
            )?,
            SpecificStats::Sort(s) => writeln!(
                f,
                "{}  pattern={} limit={} memUsage={} memLimit={}",
                pad, s.pattern, s.limit, s.mem_usage, s.mem_limit
            )?,
            SpecificStats::CollectionScan(s) => {
                writeln!(f, "{}  direction={} docsTested={}", pad, s.direction, s.docs_tested)?
            }
            SpecificStats::Fetch(s) => writeln!(
                f,
                "{}  docsExamined={} forcedFetches={}",
                pad, s.docs_examined, s.forced_fetches
            )?,
            SpecificStats::OplogStart(s) => writeln!(
                f,
                "{}  phase={} extentsSkipped={}",
                pad, s.phase, s.extents_skipped
            )?,
            SpecificStats::None => {}
        }
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanStageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXECUTION STATS ===")?;
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::working_set::WorkingSet;

    #[test]
    fn test_record_counts_states() {
        let mut ws = WorkingSet::new();
        let mut common = CommonStats::default();
        common.record(StageState::NeedTime);
        common.record(StageState::Advanced(ws.allocate()));
        common.record(StageState::IsEof);

        assert_eq!(common.works, 3);
        assert_eq!(common.advanced, 1);
        assert_eq!(common.need_time, 1);
        assert!(common.is_eof);
    }

    #[test]
    fn test_display_renders_tree() {
        let child = PlanStageStats::new(
            StageType::IndexScan,
            CommonStats::default(),
            SpecificStats::IndexScan(IndexScanStats {
                index_name: "a_1".into(),
                ..Default::default()
            }),
        );
        let root = PlanStageStats::new(StageType::Sort, CommonStats::default(), SpecificStats::None)
            .with_child(child);

        let text = root.to_string();
        assert!(text.contains("SORT works=0"));
        assert!(text.contains("  IXSCAN"));
        assert!(text.contains("index=a_1"));
        assert!(root.find(StageType::IndexScan).is_some());
    }

    #[test]
    fn test_stats_serialize() {
        let stats = PlanStageStats::new(StageType::Fetch, CommonStats::default(), SpecificStats::None);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["stage_type"], "Fetch");
        assert_eq!(json["common"]["works"], 0);
    }
}
