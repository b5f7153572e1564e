//! Blocking sort stage
//!
//! Buffers every child result, sorts them once the child reaches EOF and
//! then emits them in order. With a limit only the best `limit` results are
//! kept while buffering. Memory held by the buffer is capped; exceeding the
//! cap fails the stage permanently.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::config::ExecConfig;
use crate::document::KeyValue;
use crate::matcher::Predicate;
use crate::observability::Logger;
use crate::storage::RecordId;

use super::errors::{ExecError, ExecResult};
use super::plan_stage::{BoxedStage, InvalidationType, PlanStage, StageFailure, StageState};
use super::sort_key::{SortPattern, SortStageKeyGenerator};
use super::stats::{CommonStats, PlanStageStats, SortStats, SpecificStats, StageType};
use super::working_set::{WorkingSet, WorkingSetID};

/// Default cap on buffered bytes
pub const DEFAULT_SORT_MAX_BYTES: usize = 32 * 1024 * 1024;

/// Parameters of a sort
#[derive(Debug, Clone)]
pub struct SortStageParams {
    /// Sort order
    pub pattern: SortPattern,
    /// Query the child is answering; narrows array sort keys
    pub query: Vec<Predicate>,
    /// Keep only the first `limit` results; 0 keeps everything
    pub limit: usize,
    /// Cap on buffered bytes
    pub max_bytes: usize,
}

impl SortStageParams {
    /// Unlimited sort by `pattern`
    pub fn new(pattern: SortPattern) -> Self {
        Self {
            pattern,
            query: Vec::new(),
            limit: 0,
            max_bytes: DEFAULT_SORT_MAX_BYTES,
        }
    }

    /// Unlimited sort by `pattern`, buffering at most `config.sort_max_bytes`
    pub fn with_config(pattern: SortPattern, config: &ExecConfig) -> Self {
        Self {
            max_bytes: config.sort_max_bytes,
            ..Self::new(pattern)
        }
    }
}

#[derive(Debug, Clone)]
struct SortableItem {
    key: Vec<KeyValue>,
    loc: Option<RecordId>,
    wsid: WorkingSetID,
}

/// Orders by key, then location, then working set ID, so equal keys still
/// produce a deterministic order.
fn compare_items(keys: &SortStageKeyGenerator, a: &SortableItem, b: &SortableItem) -> Ordering {
    keys.compare(&a.key, &b.key)
        .then_with(|| a.loc.cmp(&b.loc))
        .then_with(|| a.wsid.cmp(&b.wsid))
}

/// Item inside the bounded top-k set
struct RankedItem {
    item: SortableItem,
    keys: Arc<SortStageKeyGenerator>,
}

impl PartialEq for RankedItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedItem {}

impl PartialOrd for RankedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_items(&self.keys, &self.item, &other.item)
    }
}

/// Sorts the output of its child.
pub struct SortStage {
    child: BoxedStage,
    params: SortStageParams,
    keys: Option<Arc<SortStageKeyGenerator>>,
    // Unlimited sorts and a limit of one
    data: Vec<SortableItem>,
    // Limit greater than one
    top: BTreeSet<RankedItem>,
    results: VecDeque<SortableItem>,
    sorted: bool,
    loc_to_wsid: HashMap<RecordId, WorkingSetID>,
    self_flagged: HashSet<WorkingSetID>,
    mem_usage: usize,
    failure: Option<StageFailure>,
    common: CommonStats,
    specific: SortStats,
}

impl SortStage {
    /// Creates a sort over `child`
    pub fn new(params: SortStageParams, child: BoxedStage) -> Self {
        let specific = SortStats {
            pattern: params.pattern.to_string(),
            limit: params.limit,
            mem_limit: params.max_bytes,
            ..Default::default()
        };
        Self {
            child,
            params,
            keys: None,
            data: Vec::new(),
            top: BTreeSet::new(),
            results: VecDeque::new(),
            sorted: false,
            loc_to_wsid: HashMap::new(),
            self_flagged: HashSet::new(),
            mem_usage: 0,
            failure: None,
            common: CommonStats::default(),
            specific,
        }
    }

    fn item_usage(ws: &WorkingSet, item: &SortableItem) -> ExecResult<usize> {
        let key_size = item.key.iter().map(KeyValue::approx_size).sum::<usize>();
        Ok(ws.get(item.wsid)?.mem_usage() + key_size)
    }

    /// Releases a buffered member that can no longer be emitted.
    fn discard(&mut self, ws: &mut WorkingSet, item: &SortableItem) -> ExecResult<()> {
        if let Some(loc) = item.loc {
            if self.loc_to_wsid.get(&loc) == Some(&item.wsid) {
                self.loc_to_wsid.remove(&loc);
            }
        }
        self.self_flagged.remove(&item.wsid);
        ws.unflag(item.wsid);
        ws.free(item.wsid)
    }

    fn add_to_buffer(&mut self, ws: &mut WorkingSet, keys: &Arc<SortStageKeyGenerator>, item: SortableItem) -> ExecResult<()> {
        match self.params.limit {
            0 => {
                self.mem_usage += Self::item_usage(ws, &item)?;
                self.data.push(item);
            }
            1 => {
                // Keep a single best item.
                let replace = match self.data.first() {
                    None => true,
                    Some(best) => compare_items(keys, &item, best) == Ordering::Less,
                };
                if replace {
                    self.mem_usage = Self::item_usage(ws, &item)?;
                    if let Some(previous) = self.data.pop() {
                        self.discard(ws, &previous)?;
                    }
                    self.data.push(item);
                } else {
                    self.discard(ws, &item)?;
                }
            }
            limit => {
                let usage = Self::item_usage(ws, &item)?;
                if self.top.len() < limit {
                    self.mem_usage += usage;
                    self.top.insert(RankedItem { item, keys: Arc::clone(keys) });
                    return Ok(());
                }
                let worse_than_all = match self.top.last() {
                    Some(worst) => compare_items(keys, &item, &worst.item) != Ordering::Less,
                    None => false,
                };
                if worse_than_all {
                    self.discard(ws, &item)?;
                    return Ok(());
                }
                if let Some(evicted) = self.top.pop_last() {
                    self.mem_usage = self
                        .mem_usage
                        .saturating_sub(Self::item_usage(ws, &evicted.item)?);
                    self.discard(ws, &evicted.item)?;
                }
                self.mem_usage += usage;
                self.top.insert(RankedItem { item, keys: Arc::clone(keys) });
            }
        }
        Ok(())
    }

    fn sort_buffer(&mut self, keys: &SortStageKeyGenerator) {
        if self.params.limit > 1 {
            self.results = std::mem::take(&mut self.top)
                .into_iter()
                .map(|ranked| ranked.item)
                .collect();
        } else {
            let mut data = std::mem::take(&mut self.data);
            data.sort_by(|a, b| compare_items(keys, a, b));
            self.results = data.into();
        }
        self.sorted = true;
    }

    fn fail(&mut self, failure: StageFailure) -> StageState {
        self.failure = Some(failure.clone());
        StageState::Failure(failure)
    }

    fn step(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let keys = match &self.keys {
            Some(keys) => Arc::clone(keys),
            None => {
                let keys = SortStageKeyGenerator::new(&self.params.pattern, &self.params.query)?;
                self.keys = Some(Arc::new(keys));
                return Ok(StageState::NeedTime);
            }
        };

        if let Some(failure) = &self.failure {
            return Ok(StageState::Failure(failure.clone()));
        }
        if self.mem_usage > self.params.max_bytes {
            Logger::error(
                "SORT_MEMORY_LIMIT_EXCEEDED",
                &[
                    ("mem_usage", &self.mem_usage.to_string()),
                    ("max_bytes", &self.params.max_bytes.to_string()),
                    ("pattern", &self.specific.pattern),
                ],
            );
            return Ok(self.fail(StageFailure {
                stage: "SORT",
                reason: format!(
                    "sort used {} bytes, more than the {} byte limit",
                    self.mem_usage, self.params.max_bytes
                ),
            }));
        }

        if self.is_eof() {
            return Ok(StageState::IsEof);
        }

        if !self.sorted {
            return match self.child.work(ws)? {
                StageState::Advanced(id) => {
                    let member = ws.get(id)?;
                    if !member.has_obj() {
                        Logger::fatal(
                            "SORT_INPUT_WITHOUT_DOCUMENT",
                            &[("wsid", &id.to_string()), ("state", member.state_name())],
                        );
                        return Err(ExecError::invariant(format!(
                            "sort received {} in state {}",
                            id,
                            member.state_name()
                        )));
                    }
                    let loc = member.loc();
                    let key = keys.get_sort_key(member);
                    if let Some(loc) = loc {
                        self.loc_to_wsid.insert(loc, id);
                    }
                    self.add_to_buffer(ws, &keys, SortableItem { key, loc, wsid: id })?;
                    self.specific.mem_usage = self.mem_usage;
                    Ok(StageState::NeedTime)
                }
                StageState::IsEof => {
                    self.sort_buffer(&keys);
                    Ok(StageState::NeedTime)
                }
                StageState::Failure(failure) => Ok(self.fail(failure)),
                other => Ok(other),
            };
        }

        let Some(item) = self.results.pop_front() else {
            return Ok(StageState::IsEof);
        };
        if let Some(loc) = item.loc {
            if self.loc_to_wsid.get(&loc) == Some(&item.wsid) {
                self.loc_to_wsid.remove(&loc);
            }
        }

        if ws.is_flagged(item.wsid) {
            // Materialized by our own invalidate(): still a valid result.
            if self.self_flagged.remove(&item.wsid) {
                return Ok(StageState::Advanced(item.wsid));
            }
            ws.unflag(item.wsid);
            ws.free(item.wsid)?;
            return Ok(StageState::NeedTime);
        }

        Ok(StageState::Advanced(item.wsid))
    }
}

impl PlanStage for SortStage {
    fn work(&mut self, ws: &mut WorkingSet) -> ExecResult<StageState> {
        let state = self.step(ws)?;
        Ok(self.common.record(state))
    }

    fn is_eof(&self) -> bool {
        self.child.is_eof() && self.sorted && self.results.is_empty()
    }

    fn invalidate(&mut self, ws: &mut WorkingSet, loc: RecordId, kind: InvalidationType) -> ExecResult<()> {
        self.common.invalidates += 1;
        self.child.invalidate(ws, loc, kind)?;

        // Buffered results keep the version of the document they were sorted by.
        if let Some(id) = self.loc_to_wsid.remove(&loc) {
            ws.get_mut(id)?.fetch_and_invalidate()?;
            ws.flag_for_review(id)?;
            self.self_flagged.insert(id);
            self.specific.forced_fetches += 1;
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
        StageType::Sort
    }

    fn stats(&self) -> PlanStageStats {
        let mut specific = self.specific.clone();
        specific.mem_usage = self.mem_usage;
        PlanStageStats::new(StageType::Sort, self.common.clone(), SpecificStats::Sort(specific))
            .with_child(self.child.stats())
    }
}
