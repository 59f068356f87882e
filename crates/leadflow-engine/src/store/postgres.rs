//! PostgreSQL Run Store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::models::{
    Continuation, EventOutcome, EventResolution, Trigger, TriggerEvent, TriggerMetric, Workflow,
    WorkflowRun, WorkflowStep, WorkflowStepRun,
};
use crate::db::{queries, DbPool};
use crate::error::{AppError, AppResult};

use super::RunStore;

/// Run Store backed by the `leadflow` schema.
#[derive(Clone)]
pub struct PgRunStore {
    pool: DbPool,
}

impl PgRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgRunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRunStore").finish_non_exhaustive()
    }
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn get_workflow(&self, id: Uuid) -> AppResult<Option<Workflow>> {
        queries::workflow::get_workflow(&self.pool, id).await
    }

    async fn save_workflow(&self, workflow: &Workflow) -> AppResult<()> {
        queries::workflow::upsert_workflow(&self.pool, workflow).await
    }

    async fn list_steps(&self, workflow_id: Uuid) -> AppResult<Vec<WorkflowStep>> {
        queries::workflow::list_steps(&self.pool, workflow_id).await
    }

    async fn save_step(&self, step: &WorkflowStep) -> AppResult<()> {
        queries::workflow::upsert_step(&self.pool, step).await
    }

    async fn record_workflow_run(
        &self,
        workflow_id: Uuid,
        succeeded: bool,
        execution_time_ms: i64,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let updated = queries::workflow::record_run(
            &self.pool,
            workflow_id,
            succeeded,
            execution_time_ms,
            at,
        )
        .await?;
        if !updated {
            return Err(AppError::NotFound(format!("Workflow {}", workflow_id)));
        }
        Ok(())
    }

    async fn get_trigger(&self, id: Uuid) -> AppResult<Option<Trigger>> {
        queries::trigger::get_trigger(&self.pool, id).await
    }

    async fn save_trigger(&self, trigger: &Trigger) -> AppResult<()> {
        queries::trigger::upsert_trigger(&self.pool, trigger).await
    }

    async fn claim_trigger_firing(
        &self,
        id: Uuid,
        event_created_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        queries::trigger::claim_firing(&self.pool, id, event_created_at, at).await
    }

    async fn enqueue_event(&self, event: &TriggerEvent) -> AppResult<()> {
        queries::trigger::insert_event(&self.pool, event).await
    }

    async fn claim_pending_events(&self, limit: usize) -> AppResult<Vec<TriggerEvent>> {
        queries::trigger::claim_pending_events(&self.pool, to_limit(limit)).await
    }

    async fn get_event(&self, id: Uuid) -> AppResult<Option<TriggerEvent>> {
        queries::trigger::get_event(&self.pool, id).await
    }

    async fn resolve_event(&self, id: Uuid, resolution: &EventResolution) -> AppResult<bool> {
        queries::trigger::resolve_event(&self.pool, id, resolution).await
    }

    async fn create_run(&self, run: &WorkflowRun) -> AppResult<()> {
        queries::run::insert_run(&self.pool, run).await
    }

    async fn get_run(&self, id: Uuid) -> AppResult<Option<WorkflowRun>> {
        queries::run::get_run(&self.pool, id).await
    }

    async fn update_run(&self, run: &WorkflowRun) -> AppResult<bool> {
        queries::run::update_run(&self.pool, run).await
    }

    async fn cancel_run(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        queries::run::cancel_run(&self.pool, id, at).await
    }

    async fn try_lock_run(&self, id: Uuid, token: &str, ttl: Duration) -> AppResult<bool> {
        queries::run::try_lock_run(&self.pool, id, token, ttl.as_secs_f64()).await
    }

    async fn unlock_run(&self, id: Uuid, token: &str) -> AppResult<()> {
        queries::run::unlock_run(&self.pool, id, token).await
    }

    async fn create_step_run(&self, step_run: &WorkflowStepRun) -> AppResult<()> {
        queries::run::insert_step_run(&self.pool, step_run).await
    }

    async fn update_step_run(&self, step_run: &WorkflowStepRun) -> AppResult<()> {
        queries::run::update_step_run(&self.pool, step_run).await
    }

    async fn get_step_run(&self, id: Uuid) -> AppResult<Option<WorkflowStepRun>> {
        queries::run::get_step_run(&self.pool, id).await
    }

    async fn list_step_runs(&self, run_id: Uuid) -> AppResult<Vec<WorkflowStepRun>> {
        queries::run::list_step_runs(&self.pool, run_id).await
    }

    async fn record_trigger_metric(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
        outcome: EventOutcome,
        processing_time_ms: f64,
    ) -> AppResult<TriggerMetric> {
        queries::metric::record_event(&self.pool, trigger_id, date, outcome, processing_time_ms)
            .await
    }

    async fn get_trigger_metric(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
    ) -> AppResult<Option<TriggerMetric>> {
        queries::metric::get_metric(&self.pool, trigger_id, date).await
    }

    async fn schedule_continuation(&self, continuation: &Continuation) -> AppResult<()> {
        queries::continuation::insert_continuation(&self.pool, continuation).await
    }

    async fn claim_due_continuations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Continuation>> {
        queries::continuation::claim_due(&self.pool, now, to_limit(limit)).await
    }

    async fn complete_continuation(&self, id: Uuid) -> AppResult<()> {
        queries::continuation::delete_continuation(&self.pool, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_limit_saturates() {
        assert_eq!(to_limit(50), 50);
        assert_eq!(to_limit(usize::MAX), i64::MAX);
    }
}
