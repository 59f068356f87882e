//! Run Store: persistence seam for workflows, triggers, events, runs and metrics.
//!
//! Two implementations ship with the engine:
//! - [`MemoryStore`]: mutex-guarded in-process store (tests, single node)
//! - [`PgRunStore`]: PostgreSQL via `sqlx`
//!
//! Counter updates (`record_workflow_run`, `record_trigger_metric`) are
//! atomic read-modify-write operations in both implementations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::models::{
    Continuation, EventOutcome, EventResolution, Trigger, TriggerEvent, TriggerMetric, Workflow,
    WorkflowRun, WorkflowStep, WorkflowStepRun,
};
use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgRunStore;

#[async_trait]
pub trait RunStore: Send + Sync {
    // Workflows

    async fn get_workflow(&self, id: Uuid) -> AppResult<Option<Workflow>>;

    async fn save_workflow(&self, workflow: &Workflow) -> AppResult<()>;

    /// Steps of a workflow ordered by position.
    async fn list_steps(&self, workflow_id: Uuid) -> AppResult<Vec<WorkflowStep>>;

    async fn save_step(&self, step: &WorkflowStep) -> AppResult<()>;

    /// Atomically fold a finished run into the workflow's rolling counters.
    async fn record_workflow_run(
        &self,
        workflow_id: Uuid,
        succeeded: bool,
        execution_time_ms: i64,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    // Triggers

    async fn get_trigger(&self, id: Uuid) -> AppResult<Option<Trigger>>;

    async fn save_trigger(&self, trigger: &Trigger) -> AppResult<()>;

    /// Atomically record a firing at `at` unless an event created at
    /// `event_created_at` still falls inside the trigger's cooldown window.
    /// Returns `false` when the cooldown holds or the trigger is missing.
    async fn claim_trigger_firing(
        &self,
        id: Uuid,
        event_created_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> AppResult<bool>;

    // Trigger events

    async fn enqueue_event(&self, event: &TriggerEvent) -> AppResult<()>;

    /// Claim up to `limit` events still in `triggered` status, oldest first.
    ///
    /// A claimed event is not returned again until its claim lease expires,
    /// so concurrent gateways never process the same event twice.
    async fn claim_pending_events(&self, limit: usize) -> AppResult<Vec<TriggerEvent>>;

    async fn get_event(&self, id: Uuid) -> AppResult<Option<TriggerEvent>>;

    /// Move an event to a terminal status. Returns `false` if the event was
    /// already terminal or does not exist.
    async fn resolve_event(&self, id: Uuid, resolution: &EventResolution) -> AppResult<bool>;

    // Runs

    async fn create_run(&self, run: &WorkflowRun) -> AppResult<()>;

    async fn get_run(&self, id: Uuid) -> AppResult<Option<WorkflowRun>>;

    /// Persist run state. Returns `false` without writing if the stored run
    /// is already terminal (e.g. cancelled while a step was executing).
    async fn update_run(&self, run: &WorkflowRun) -> AppResult<bool>;

    /// Move a non-terminal run to `cancelled`. Returns `false` if the run is
    /// already terminal or missing.
    async fn cancel_run(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    /// Acquire the per-run traversal lease under `token`. Returns `false`
    /// while any unexpired lease is held, whatever its token.
    async fn try_lock_run(&self, id: Uuid, token: &str, ttl: Duration) -> AppResult<bool>;

    /// Release the lease if it is still held under `token`.
    async fn unlock_run(&self, id: Uuid, token: &str) -> AppResult<()>;

    // Step runs

    async fn create_step_run(&self, step_run: &WorkflowStepRun) -> AppResult<()>;

    async fn update_step_run(&self, step_run: &WorkflowStepRun) -> AppResult<()>;

    async fn get_step_run(&self, id: Uuid) -> AppResult<Option<WorkflowStepRun>>;

    /// Attempt trail of a run in creation order.
    async fn list_step_runs(&self, run_id: Uuid) -> AppResult<Vec<WorkflowStepRun>>;

    // Metrics

    /// Atomically count one event for `(trigger_id, date)` and return the
    /// updated row.
    async fn record_trigger_metric(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
        outcome: EventOutcome,
        processing_time_ms: f64,
    ) -> AppResult<TriggerMetric>;

    async fn get_trigger_metric(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
    ) -> AppResult<Option<TriggerMetric>>;

    // Continuations

    /// Store a continuation. Scheduling an existing id moves its due time
    /// and releases its claim.
    async fn schedule_continuation(&self, continuation: &Continuation) -> AppResult<()>;

    /// Claim up to `limit` continuations due at or before `now`, earliest
    /// first. A claim is a lease: until it expires the continuation is not
    /// handed out again, and once it expires an unacknowledged continuation
    /// is claimable anew.
    async fn claim_due_continuations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Continuation>>;

    /// Acknowledge a delivered continuation and remove it.
    async fn complete_continuation(&self, id: Uuid) -> AppResult<()>;
}
