//! Plan executor
//!
//! Drives a stage tree from its root and handles every state a stage can
//! ask for:
//!
//! 1. Check the operation for interruption before each `work()`
//! 2. Yield every `yield_iterations` works, or when a stage asks
//! 3. Page records in for `NeedFetch`
//! 4. Turn `Advanced` members into `ResultDocument`s and free them
//! 5. Stop on EOF, and on FAILURE or any error

use std::sync::Arc;

use crate::config::ExecConfig;
use crate::observability::{ExecMetrics, Logger};
use crate::storage::{RecordId, RecordStore};

use super::context::OperationContext;
use super::errors::{ExecError, ExecResult};
use super::plan_stage::{BoxedStage, InvalidationType, StageState};
use super::result::{ExecutionResult, ResultDocument};
use super::stats::PlanStageStats;
use super::working_set::{WorkingSet, WorkingSetID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecState {
    Running,
    Eof,
    Dead,
}

/// Runs a plan against a working set it owns.
pub struct PlanExecutor {
    root: BoxedStage,
    ws: WorkingSet,
    store: Arc<dyn RecordStore>,
    metrics: Option<Arc<ExecMetrics>>,
    yield_iterations: u64,
    works_since_yield: u64,
    works: u64,
    yields: u64,
    fetch_requests: u64,
    state: ExecState,
}

impl PlanExecutor {
    /// Creates an executor for `root`. `store` pages records in on request.
    pub fn new(root: BoxedStage, store: Arc<dyn RecordStore>, config: &ExecConfig) -> Self {
        Self {
            root,
            ws: WorkingSet::new(),
            store,
            metrics: None,
            yield_iterations: config.yield_iterations,
            works_since_yield: 0,
            works: 0,
            yields: 0,
            fetch_requests: 0,
            state: ExecState::Running,
        }
    }

    /// Reports into a shared metrics registry
    pub fn with_metrics(mut self, metrics: Arc<ExecMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns true once the plan produced its last result
    pub fn is_eof(&self) -> bool {
        self.state == ExecState::Eof
    }

    /// Working set of the plan
    pub fn working_set(&self) -> &WorkingSet {
        &self.ws
    }

    /// Statistics of the whole tree
    pub fn stats(&self) -> PlanStageStats {
        self.root.stats()
    }

    /// Returns the next result, or None at EOF.
    ///
    /// After an error the executor is dead and every later call fails.
    pub fn get_next(&mut self, ctx: &OperationContext) -> ExecResult<Option<ResultDocument>> {
        match self.state {
            ExecState::Eof => return Ok(None),
            ExecState::Dead => return Err(ExecError::invariant("executor used after failure")),
            ExecState::Running => {}
        }

        loop {
            if let Err(err) = ctx.check_for_interrupt() {
                Logger::warn(
                    "PLAN_EXECUTOR_INTERRUPTED",
                    &[("op_id", &ctx.op_id().to_string()), ("reason", err.message())],
                );
                if let Some(m) = &self.metrics {
                    m.increment_queries_interrupted();
                }
                self.state = ExecState::Dead;
                return Err(err);
            }

            if self.yield_iterations != 0 && self.works_since_yield >= self.yield_iterations {
                self.yield_now(ctx, "periodic")?;
            }

            let state = match self.root.work(&mut self.ws) {
                Ok(state) => state,
                Err(err) => return Err(self.fail(ctx, err)),
            };
            self.works += 1;
            self.works_since_yield += 1;
            if let Some(m) = &self.metrics {
                m.increment_works();
            }

            match state {
                StageState::Advanced(id) => {
                    let doc = match self.take_result(id) {
                        Ok(doc) => doc,
                        Err(err) => return Err(self.fail(ctx, err)),
                    };
                    if let Some(m) = &self.metrics {
                        m.add_documents_returned(1);
                    }
                    return Ok(Some(doc));
                }
                StageState::NeedTime => {}
                StageState::NeedYield => self.yield_now(ctx, "requested")?,
                StageState::NeedFetch(id) => {
                    if let Err(err) = self.page_in(id) {
                        return Err(self.fail(ctx, err));
                    }
                }
                StageState::IsEof => {
                    self.state = ExecState::Eof;
                    if let Some(m) = &self.metrics {
                        m.increment_queries_executed();
                    }
                    return Ok(None);
                }
                StageState::Failure(failure) => {
                    let err = ExecError::stage_failure(failure.stage, failure.reason);
                    return Err(self.fail(ctx, err));
                }
            }
        }
    }

    /// Runs the plan to EOF, collecting every result.
    pub fn execute_all(&mut self, ctx: &OperationContext) -> ExecResult<ExecutionResult> {
        let mut documents = Vec::new();
        while let Some(doc) = self.get_next(ctx)? {
            documents.push(doc);
        }
        Ok(ExecutionResult {
            documents,
            works: self.works,
            yields: self.yields,
            fetch_requests: self.fetch_requests,
            stats: self.root.stats(),
        })
    }

    /// Notifies the tree that `loc` is about to be deleted or changed.
    pub fn invalidate(&mut self, loc: RecordId, kind: InvalidationType) -> ExecResult<()> {
        self.root.invalidate(&mut self.ws, loc, kind)
    }

    /// Saves the tree, releases the snapshot and restores.
    ///
    /// Members still pointing into storage get their own copy first.
    pub fn yield_now(&mut self, ctx: &OperationContext, reason: &str) -> ExecResult<()> {
        self.root.save_state();
        let converted = self.ws.prepare_for_yield();
        Logger::trace(
            "PLAN_EXECUTOR_YIELD",
            &[
                ("converted", &converted.to_string()),
                ("op_id", &ctx.op_id().to_string()),
                ("reason", reason),
                ("works", &self.works.to_string()),
            ],
        );
        self.yields += 1;
        self.works_since_yield = 0;
        if let Some(m) = &self.metrics {
            m.increment_yields();
        }
        if let Err(err) = self.root.restore_state() {
            return Err(self.fail(ctx, err));
        }
        Ok(())
    }

    fn page_in(&mut self, id: WorkingSetID) -> ExecResult<()> {
        let Some(loc) = self.ws.get(id)?.loc() else {
            return Err(ExecError::invariant(format!("fetch requested for {} without a location", id)));
        };
        self.store.page_in(loc)?;
        self.fetch_requests += 1;
        if let Some(m) = &self.metrics {
            m.increment_fetch_requests();
        }
        Ok(())
    }

    fn take_result(&mut self, id: WorkingSetID) -> ExecResult<ResultDocument> {
        let member = self.ws.get(id)?;
        let body = match member.obj() {
            Some(obj) => obj.clone(),
            // Index-only result: return the key projection.
            None => match member.key_data().first() {
                Some(datum) => datum.key_pattern.key_to_json(&datum.key_data),
                None => {
                    return Err(ExecError::invariant(format!(
                        "{} returned in state {}",
                        id,
                        member.state_name()
                    )))
                }
            },
        };
        let loc = member.loc();
        let flagged = self.ws.unflag(id);
        self.ws.free(id)?;
        Ok(ResultDocument::new(loc, body, flagged))
    }

    fn fail(&mut self, ctx: &OperationContext, err: ExecError) -> ExecError {
        let op_id = ctx.op_id().to_string();
        let fields = [
            ("code", err.code().code()),
            ("op_id", op_id.as_str()),
            ("reason", err.message()),
            ("stage", err.stage().unwrap_or("")),
        ];
        if err.is_fatal() {
            Logger::fatal("PLAN_EXECUTOR_FAILED", &fields);
        } else {
            Logger::error("PLAN_EXECUTOR_FAILED", &fields);
        }
        if let Some(m) = &self.metrics {
            m.increment_queries_failed();
        }
        self.state = ExecState::Dead;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::queued_data::QueuedDataStage;
    use crate::exec::working_set::WorkingSetMember;
    use crate::storage::ExtentCollection;
    use serde_json::json;

    fn store() -> Arc<dyn RecordStore> {
        Arc::new(ExtentCollection::new(4))
    }

    fn owned(doc: serde_json::Value) -> WorkingSetMember {
        let mut member = WorkingSetMember::default();
        member.set_owned_obj(None, doc);
        member
    }

    #[test]
    fn test_yield_requests_are_honored() {
        let mut root = QueuedDataStage::new();
        root.push_back_state(StageState::NeedYield);
        root.push_back(owned(json!({"a": 1})));
        let mut exec = PlanExecutor::new(Box::new(root), store(), &ExecConfig::default());

        let result = exec.execute_all(&OperationContext::new()).unwrap();
        assert_eq!(result.bodies(), vec![json!({"a": 1})]);
        assert_eq!(result.yields, 1);
        assert_eq!(result.stats.common.yields, 1);
        assert!(exec.working_set().is_empty());
    }

    #[test]
    fn test_periodic_yield() {
        let mut root = QueuedDataStage::new();
        for i in 0..5 {
            root.push_back(owned(json!({"i": i})));
        }
        let config = ExecConfig {
            yield_iterations: 2,
            ..ExecConfig::default()
        };
        let mut exec = PlanExecutor::new(Box::new(root), store(), &config);
        let result = exec.execute_all(&OperationContext::new()).unwrap();
        assert_eq!(result.len(), 5);
        assert_eq!(result.works, 6);
        assert_eq!(result.yields, 2);
    }

    #[test]
    fn test_failure_kills_executor() {
        let mut root = QueuedDataStage::new();
        root.push_back_state(StageState::Failure(crate::exec::plan_stage::StageFailure {
            stage: "SORT",
            reason: "out of memory".into(),
        }));
        let metrics = Arc::new(ExecMetrics::new());
        let mut exec = PlanExecutor::new(Box::new(root), store(), &ExecConfig::default())
            .with_metrics(Arc::clone(&metrics));
        let ctx = OperationContext::new();

        let err = exec.get_next(&ctx).unwrap_err();
        assert_eq!(err.stage(), Some("SORT"));
        assert!(exec.get_next(&ctx).is_err());
        assert_eq!(metrics.snapshot().queries_failed, 1);
    }

    #[test]
    fn test_killed_operation_stops() {
        let mut root = QueuedDataStage::new();
        root.push_back(owned(json!({"a": 1})));
        let mut exec = PlanExecutor::new(Box::new(root), store(), &ExecConfig::default());
        let ctx = OperationContext::new();
        ctx.kill_handle().kill();
        assert!(exec.get_next(&ctx).is_err());
    }
}
