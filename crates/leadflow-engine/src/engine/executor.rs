//! Workflow execution engine.
//!
//! Drives a run through its step graph:
//! - builds each step's input and dispatches on the step type
//! - merges outputs into the run context under `step_<uid>`
//! - routes condition steps to their true/false branches
//! - applies per-step retry and `on_error` policies
//! - suspends at delay steps and delayed retries by scheduling a
//!   [`Continuation`] instead of sleeping
//!
//! Every traversal runs under the store's per-run lease lock and re-reads the
//! run status before each step, so a cancelled run stops without executing
//! further steps or retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use leadflow_actions::ActionRegistry;

use crate::db::models::{
    Continuation, ContinuationKind, RunDetail, RunStatus, StepRunStatus, StepType, WorkflowRun,
    WorkflowStep, WorkflowStepRun,
};
use crate::error::{AppError, AppResult};
use crate::result_ext::{OptionResultExt, ResultExt};
use crate::services::metrics::MetricsAggregator;
use crate::store::RunStore;

use super::condition::{self, ConditionEvaluator};
use super::graph::{Edge, StepGraph};
use super::mapper;
use super::scheduler::Scheduler;
use super::step::{self, DelaySpec, ErrorHandling, OnError, StepError};

/// Seconds to push back a continuation whose run is locked elsewhere.
const LOCK_RETRY_DELAY_SECS: i64 = 2;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ceiling on step attempts per run; guards against cyclic graphs.
    pub max_steps_per_run: i32,

    /// Lease length of the per-run traversal lock.
    pub run_lock_ttl: Duration,

    /// Spawn new runs on the runtime instead of executing them inline.
    pub detached_runs: bool,

    /// Identity prefix of the per-acquisition run lock tokens.
    pub lock_owner: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: 100,
            run_lock_ttl: Duration::from_secs(300),
            detached_runs: true,
            lock_owner: format!("leadflow-{}", Uuid::new_v4()),
        }
    }
}

/// Who asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunOrigin {
    /// Started directly by a host (API, manual trigger).
    Manual,
    /// Started by the trigger gateway for a queued event.
    Trigger {
        trigger_id: Uuid,
        event_id: Option<Uuid>,
    },
}

/// What happened to a delivered continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Traversal continued.
    Resumed,
    /// The run is locked elsewhere; the continuation was pushed back.
    Deferred,
    /// The run is finished or gone; nothing to do.
    Skipped,
}

/// Successful step result.
enum StepOutcome {
    Completed { output: Value, edge: Edge },
    Delayed { output: Value, resume_at: chrono::DateTime<Utc> },
}

/// Where traversal should start.
struct Cursor {
    step_id: Uuid,
    attempt: i32,
    previous: Option<WorkflowStepRun>,
}

pub struct ExecutionEngine {
    store: Arc<dyn RunStore>,
    actions: Arc<ActionRegistry>,
    scheduler: Arc<dyn Scheduler>,
    metrics: MetricsAggregator,
    evaluator: ConditionEvaluator,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn RunStore>,
        actions: Arc<ActionRegistry>,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            metrics: MetricsAggregator::new(store.clone()),
            store,
            actions,
            scheduler,
            evaluator: ConditionEvaluator::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a pending run for `workflow_id` and start it.
    ///
    /// In detached mode the run is spawned and the pending snapshot is
    /// returned; otherwise the run is executed to its first suspension or
    /// terminal state before returning.
    pub async fn start_run(
        self: &Arc<Self>,
        workflow_id: Uuid,
        input: Value,
        origin: RunOrigin,
    ) -> AppResult<WorkflowRun> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Workflow {}", workflow_id)))?;
        if !workflow.is_executable() {
            return Err(AppError::Conflict("Workflow is not active".to_string()));
        }

        let mut run = WorkflowRun::new(workflow_id, input);
        if let RunOrigin::Trigger {
            trigger_id,
            event_id,
        } = origin
        {
            run.trigger_id = Some(trigger_id);
            run.trigger_event_id = event_id;
        }
        self.store.create_run(&run).await?;

        info!(run_id = %run.id, workflow_id = %workflow_id, "Run created");

        if self.config.detached_runs {
            self.launch(run.id);
            return Ok(run);
        }
        self.execute(run.id).await
    }

    /// Execute a pending run on a spawned task.
    pub fn launch(self: &Arc<Self>, run_id: Uuid) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.execute(run_id).await {
                error!(run_id = %run_id, error = %e, "Run execution failed");
            }
        });
    }

    /// Execute a pending run from its entry step.
    pub async fn execute(&self, run_id: Uuid) -> AppResult<WorkflowRun> {
        let Some(token) = self.lock(run_id).await? else {
            warn!(run_id = %run_id, "Run is locked by another worker");
            return self.load_run(run_id).await;
        };
        let result = self.execute_locked(run_id).await;
        self.unlock(run_id, &token).await;
        result
    }

    /// Re-enter a run from a scheduled continuation.
    ///
    /// Delivery is at-least-once: a continuation whose run has already moved
    /// past it is skipped.
    pub async fn resume(&self, continuation: &Continuation) -> AppResult<ResumeOutcome> {
        let run_id = continuation.run_id;
        let Some(token) = self.lock(run_id).await? else {
            let due_at = Utc::now() + chrono::Duration::seconds(LOCK_RETRY_DELAY_SECS);
            self.scheduler
                .schedule_at(due_at, continuation.deferred(due_at))
                .await?;
            debug!(run_id = %run_id, "Run locked, continuation deferred");
            return Ok(ResumeOutcome::Deferred);
        };
        let result = self.resume_locked(continuation).await;
        self.unlock(run_id, &token).await;
        result
    }

    /// Externally cancel a run.
    pub async fn cancel(&self, run_id: Uuid) -> AppResult<WorkflowRun> {
        let run = self.load_run(run_id).await?;
        if run.status.is_terminal() || !self.store.cancel_run(run_id, Utc::now()).await? {
            return Err(AppError::Conflict(format!(
                "Run {} is already {}",
                run_id, run.status
            )));
        }
        info!(run_id = %run_id, "Run cancelled");
        self.load_run(run_id).await
    }

    /// Run plus its attempt trail.
    pub async fn run_detail(&self, run_id: Uuid) -> AppResult<RunDetail> {
        let run = self.load_run(run_id).await?;
        let steps = self.store.list_step_runs(run_id).await?;
        Ok(RunDetail { run, steps })
    }

    async fn load_run(&self, run_id: Uuid) -> AppResult<WorkflowRun> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Run {}", run_id)))
    }

    /// Take the run lock under a fresh token. Tasks of one engine never
    /// share a token, so the lock keeps them apart too.
    async fn lock(&self, run_id: Uuid) -> AppResult<Option<String>> {
        let token = format!("{}/{}", self.config.lock_owner, Uuid::new_v4().simple());
        let acquired = self
            .store
            .try_lock_run(run_id, &token, self.config.run_lock_ttl)
            .await?;
        Ok(acquired.then_some(token))
    }

    async fn unlock(&self, run_id: Uuid, token: &str) {
        let _ = self
            .store
            .unlock_run(run_id, token)
            .await
            .log("releasing run lock");
    }

    async fn execute_locked(&self, run_id: Uuid) -> AppResult<WorkflowRun> {
        let mut run = self.load_run(run_id).await?;
        if run.status != RunStatus::Pending {
            debug!(run_id = %run_id, status = %run.status, "Run already started");
            return Ok(run);
        }

        let now = Utc::now();
        run.status = RunStatus::Running;
        run.started_at = Some(now);
        if !self.store.update_run(&run).await? {
            return self.load_run(run_id).await;
        }
        info!(run_id = %run_id, workflow_id = %run.workflow_id, "Run started");

        let graph = StepGraph::new(self.store.list_steps(run.workflow_id).await?);
        let Some(entry) = graph.entry() else {
            let message = if graph.is_empty() {
                "workflow has no steps"
            } else {
                "workflow has no entry step"
            };
            self.fail_run(&mut run, None, 0, message, true).await?;
            return self.load_run(run_id).await;
        };

        let cursor = Cursor {
            step_id: entry.id,
            attempt: 0,
            previous: None,
        };
        self.traverse_or_fail(&mut run, &graph, cursor).await?;
        self.load_run(run_id).await
    }

    async fn resume_locked(&self, continuation: &Continuation) -> AppResult<ResumeOutcome> {
        let Some(mut run) = self.store.get_run(continuation.run_id).await? else {
            warn!(run_id = %continuation.run_id, "Continuation for unknown run dropped");
            return Ok(ResumeOutcome::Skipped);
        };
        if run.status != RunStatus::Running {
            debug!(run_id = %run.id, status = %run.status, "Continuation for inactive run skipped");
            return Ok(ResumeOutcome::Skipped);
        }
        if self.already_delivered(continuation).await? {
            debug!(
                run_id = %run.id,
                continuation_id = %continuation.id,
                "Continuation already delivered, skipped"
            );
            return Ok(ResumeOutcome::Skipped);
        }

        let graph = StepGraph::new(self.store.list_steps(run.workflow_id).await?);
        let Some(step) = graph.get(continuation.step_id) else {
            let message = format!("step {} no longer exists", continuation.step_id);
            self.fail_run(&mut run, None, 0, &message, true).await?;
            return Ok(ResumeOutcome::Resumed);
        };

        let previous = match continuation.previous_step_run_id {
            Some(id) => self
                .store
                .get_step_run(id)
                .await?
                .log_none("loading step run referenced by continuation"),
            None => None,
        };

        info!(
            run_id = %run.id,
            step = %step.uid,
            kind = %continuation.kind,
            attempt = continuation.attempt,
            "Run resumed"
        );

        match continuation.kind {
            ContinuationKind::Retry => {
                let cursor = Cursor {
                    step_id: step.id,
                    attempt: continuation.attempt,
                    previous,
                };
                self.traverse_or_fail(&mut run, &graph, cursor).await?;
            }
            ContinuationKind::Resume => match graph.successor(step, Edge::Next) {
                Ok(Some(next)) => {
                    let cursor = Cursor {
                        step_id: next.id,
                        attempt: 0,
                        previous,
                    };
                    self.traverse_or_fail(&mut run, &graph, cursor).await?;
                }
                Ok(None) => self.complete_run(&mut run).await?,
                Err(e) => {
                    self.fail_run(&mut run, Some(step), 0, &e.to_string(), true)
                        .await?
                }
            },
        }
        Ok(ResumeOutcome::Resumed)
    }

    /// A run suspends on one continuation at a time and records no attempt
    /// until it is delivered, so any attempt newer than the continuation
    /// means an earlier delivery already continued the run.
    async fn already_delivered(&self, continuation: &Continuation) -> AppResult<bool> {
        Ok(self
            .store
            .list_step_runs(continuation.run_id)
            .await?
            .iter()
            .any(|s| s.created_at > continuation.created_at))
    }

    /// Traverse, turning store errors into a failed run where possible.
    async fn traverse_or_fail(
        &self,
        run: &mut WorkflowRun,
        graph: &StepGraph,
        cursor: Cursor,
    ) -> AppResult<()> {
        if let Err(e) = self.traverse(run, graph, cursor).await {
            error!(run_id = %run.id, error = %e, "Run traversal aborted");
            let message = format!("internal error: {}", e);
            self.fail_run(run, None, 0, &message, false).await.ok();
            return Err(e);
        }
        Ok(())
    }

    async fn traverse(&self, run: &mut WorkflowRun, graph: &StepGraph, cursor: Cursor) -> AppResult<()> {
        let Some(mut step) = graph.get(cursor.step_id) else {
            return Err(AppError::Internal(format!("step {} not in graph", cursor.step_id)));
        };
        let mut attempt = cursor.attempt;
        let mut previous = cursor.previous;

        loop {
            if self.is_cancelled(run.id).await? {
                info!(run_id = %run.id, step = %step.uid, "Run cancelled, traversal stopped");
                return Ok(());
            }

            if run.steps_executed >= self.config.max_steps_per_run {
                let message = format!(
                    "run exceeded the maximum of {} step executions",
                    self.config.max_steps_per_run
                );
                self.fail_run(run, Some(step), attempt + 1, &message, true).await?;
                return Ok(());
            }

            run.steps_executed += 1;
            run.current_step_id = Some(step.id);
            if !self.store.update_run(run).await? {
                return Ok(());
            }

            let input = step::apply_step_mapping(step, step::build_input(run, previous.as_ref()));
            let input_snapshot = input.as_ref().ok().cloned().unwrap_or(Value::Null);
            let mut step_run = WorkflowStepRun::start(
                run.id,
                step.id,
                &step.uid,
                &step.step_type,
                attempt,
                input_snapshot,
            );
            self.store.create_step_run(&step_run).await?;

            debug!(run_id = %run.id, step = %step.uid, step_type = %step.step_type, attempt, "Step dispatched");

            let handling = ErrorHandling::for_step(step);
            let outcome = match (&input, &handling) {
                (Ok(input), Ok(_)) => self.dispatch(step, input).await,
                (Err(e), _) | (_, Err(e)) => Err(e.clone()),
            };

            match outcome {
                Ok(StepOutcome::Completed { output, edge }) => {
                    step_run.status = StepRunStatus::Completed;
                    step_run.output_data = Some(output.clone());
                    step_run.completed_at = Some(Utc::now());
                    self.store.update_step_run(&step_run).await?;
                    run.merge_context(&step.context_key(), output);

                    match graph.successor(step, edge) {
                        Ok(Some(next)) => {
                            step = next;
                            attempt = 0;
                            previous = Some(step_run);
                        }
                        Ok(None) => {
                            self.complete_run(run).await?;
                            return Ok(());
                        }
                        Err(e) => {
                            self.fail_run(run, Some(step), attempt + 1, &e.to_string(), true)
                                .await?;
                            return Ok(());
                        }
                    }
                }
                Ok(StepOutcome::Delayed { output, resume_at }) => {
                    step_run.status = StepRunStatus::Delayed;
                    step_run.output_data = Some(output.clone());
                    step_run.resume_at = Some(resume_at);
                    step_run.completed_at = Some(Utc::now());
                    self.store.update_step_run(&step_run).await?;
                    run.merge_context(&step.context_key(), output);
                    if !self.store.update_run(run).await? {
                        return Ok(());
                    }

                    self.scheduler
                        .schedule_at(
                            resume_at,
                            Continuation::resume(run.id, step.id, step_run.id, resume_at),
                        )
                        .await?;
                    info!(run_id = %run.id, step = %step.uid, resume_at = %resume_at, "Run delayed");
                    return Ok(());
                }
                Err(err) => {
                    step_run.status = StepRunStatus::Failed;
                    step_run.error_message = Some(err.to_string());
                    step_run.error_details = Some(json!({
                        "configuration": err.is_configuration(),
                        "retryable": err.is_retryable(),
                        "attempt": attempt,
                    }));
                    step_run.completed_at = Some(Utc::now());
                    self.store.update_step_run(&step_run).await?;

                    warn!(
                        run_id = %run.id,
                        step = %step.uid,
                        attempt,
                        error = %err,
                        "Step failed"
                    );

                    let handling = match handling {
                        Ok(handling) if !err.is_configuration() => handling,
                        _ => {
                            self.fail_run(run, Some(step), attempt + 1, &err.to_string(), true)
                                .await?;
                            return Ok(());
                        }
                    };

                    if err.is_retryable() && handling.allows_retry(attempt) {
                        let next_attempt = attempt + 1;
                        match handling.retry_delay() {
                            None => {
                                info!(run_id = %run.id, step = %step.uid, attempt = next_attempt, "Retrying step");
                                attempt = next_attempt;
                                continue;
                            }
                            Some(delay) => {
                                let due_at = Utc::now() + delay;
                                let continuation = Continuation::retry(
                                    run.id,
                                    step.id,
                                    next_attempt,
                                    previous.as_ref().map(|p| p.id),
                                    due_at,
                                );
                                if !self.store.update_run(run).await? {
                                    return Ok(());
                                }
                                self.scheduler.schedule_at(due_at, continuation).await?;
                                info!(
                                    run_id = %run.id,
                                    step = %step.uid,
                                    attempt = next_attempt,
                                    due_at = %due_at,
                                    "Step retry scheduled"
                                );
                                return Ok(());
                            }
                        }
                    }

                    let continues = handling.on_error == OnError::Continue
                        && step.kind() != Some(StepType::Condition);
                    if !continues {
                        self.fail_run(run, Some(step), attempt + 1, &err.to_string(), true)
                            .await?;
                        return Ok(());
                    }

                    match graph.successor(step, Edge::Next) {
                        Ok(Some(next)) => {
                            info!(run_id = %run.id, step = %step.uid, "Continuing after failed step");
                            step = next;
                            attempt = 0;
                            previous = Some(step_run);
                        }
                        Ok(None) => {
                            self.complete_run(run).await?;
                            return Ok(());
                        }
                        Err(e) => {
                            self.fail_run(run, Some(step), attempt + 1, &e.to_string(), true)
                                .await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn is_cancelled(&self, run_id: Uuid) -> AppResult<bool> {
        Ok(match self.store.get_run(run_id).await? {
            Some(stored) => stored.status.is_terminal(),
            None => true,
        })
    }

    async fn dispatch(&self, step: &WorkflowStep, input: &Value) -> Result<StepOutcome, StepError> {
        let Some(kind) = step.kind() else {
            return Err(StepError::Configuration(format!(
                "Unknown step type: {}",
                step.step_type
            )));
        };

        match kind {
            StepType::Action => {
                let action_type = step
                    .config
                    .get("action_type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        StepError::Configuration(format!(
                            "action step {} has no config.action_type",
                            step.uid
                        ))
                    })?;
                let action = self.actions.get(action_type).ok_or_else(|| {
                    StepError::Configuration(format!("Unknown action type: {}", action_type))
                })?;

                let output = action.execute(&step.config, input).await.map_err(|e| {
                    if e.is_configuration() {
                        StepError::Configuration(e.to_string())
                    } else {
                        StepError::Execution {
                            message: e.to_string(),
                            retryable: action.retryable(),
                        }
                    }
                })?;
                Ok(StepOutcome::Completed {
                    output,
                    edge: Edge::Next,
                })
            }
            StepType::Condition => {
                let condition = step.config.get("condition").cloned().unwrap_or(Value::Null);
                let clauses = condition::parse_clauses(&condition).map_err(|e| {
                    StepError::Configuration(format!(
                        "invalid condition on step {}: {}",
                        step.uid, e
                    ))
                })?;
                let result = self.evaluator.evaluate(input, &clauses);
                Ok(StepOutcome::Completed {
                    output: json!({"result": result, "condition": condition}),
                    edge: if result { Edge::TrueBranch } else { Edge::FalseBranch },
                })
            }
            StepType::Delay => {
                let (resume_at, output) = DelaySpec::from_config(step)?.resume_at(Utc::now())?;
                Ok(StepOutcome::Delayed { output, resume_at })
            }
            StepType::DataMapper => {
                let mapping = step
                    .config
                    .get("mapping")
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        StepError::Configuration(format!(
                            "data_mapper step {} has no config.mapping object",
                            step.uid
                        ))
                    })?;
                Ok(StepOutcome::Completed {
                    output: mapper::apply_mapping(input, mapping),
                    edge: Edge::Next,
                })
            }
        }
    }

    async fn complete_run(&self, run: &mut WorkflowRun) -> AppResult<()> {
        let now = Utc::now();
        run.status = RunStatus::Completed;
        run.completed_at = Some(now);
        run.execution_time_ms = Some(run.elapsed_ms(now));
        if !self.store.update_run(run).await? {
            return Ok(());
        }

        info!(
            run_id = %run.id,
            steps_executed = run.steps_executed,
            execution_time_ms = run.execution_time_ms.unwrap_or(0),
            "Run completed"
        );
        self.metrics
            .record_workflow_run(run.workflow_id, true, run.execution_time_ms.unwrap_or(0), now)
            .await
    }

    /// Mark the run failed. `record` controls the workflow counter update.
    async fn fail_run(
        &self,
        run: &mut WorkflowRun,
        step: Option<&WorkflowStep>,
        attempts: i32,
        message: &str,
        record: bool,
    ) -> AppResult<()> {
        let now = Utc::now();
        run.status = RunStatus::Failed;
        run.completed_at = Some(now);
        run.execution_time_ms = Some(run.elapsed_ms(now));
        run.error_message = Some(message.to_string());
        run.error_details = Some(json!({
            "step_id": step.map(|s| s.id),
            "step_uid": step.map(|s| s.uid.clone()),
            "attempts": attempts,
            "message": message,
        }));
        if !self.store.update_run(run).await? {
            return Ok(());
        }

        error!(
            run_id = %run.id,
            step = step.map(|s| s.uid.as_str()).unwrap_or("-"),
            error = %message,
            "Run failed"
        );
        if record {
            self.metrics
                .record_workflow_run(run.workflow_id, false, run.execution_time_ms.unwrap_or(0), now)
                .await?;
        }
        Ok(())
    }
}
