//! In-process Run Store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::{
    Continuation, EventOutcome, EventResolution, Trigger, TriggerEvent, TriggerEventStatus,
    TriggerMetric, Workflow, WorkflowRun, WorkflowStep, WorkflowStepRun,
};
use crate::error::{AppError, AppResult};

use crate::db::queries::continuation::CONTINUATION_CLAIM_LEASE_SECS;
use crate::db::queries::trigger::EVENT_CLAIM_LEASE_SECS;

use super::RunStore;

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, Workflow>,
    steps: Vec<WorkflowStep>,
    triggers: HashMap<Uuid, Trigger>,
    /// Insertion order doubles as the tie-break for equal `created_at`.
    events: Vec<TriggerEvent>,
    event_claims: HashMap<Uuid, DateTime<Utc>>,
    runs: HashMap<Uuid, WorkflowRun>,
    run_locks: HashMap<Uuid, (String, DateTime<Utc>)>,
    step_runs: Vec<WorkflowStepRun>,
    metrics: HashMap<(Uuid, NaiveDate), TriggerMetric>,
    continuations: Vec<Continuation>,
    continuation_claims: HashMap<Uuid, DateTime<Utc>>,
}

/// Mutex-guarded in-memory store. Every operation runs under one lock, which
/// makes the counter updates trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored continuations, claimed or not, for inspection.
    pub async fn pending_continuations(&self) -> Vec<Continuation> {
        self.inner.lock().await.continuations.clone()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn get_workflow(&self, id: Uuid) -> AppResult<Option<Workflow>> {
        Ok(self.inner.lock().await.workflows.get(&id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> AppResult<()> {
        self.inner
            .lock()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn list_steps(&self, workflow_id: Uuid) -> AppResult<Vec<WorkflowStep>> {
        let inner = self.inner.lock().await;
        let mut steps: Vec<WorkflowStep> = inner
            .steps
            .iter()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.position);
        Ok(steps)
    }

    async fn save_step(&self, step: &WorkflowStep) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.steps.iter().position(|s| s.id == step.id) {
            Some(index) => inner.steps[index] = step.clone(),
            None => inner.steps.push(step.clone()),
        }
        Ok(())
    }

    async fn record_workflow_run(
        &self,
        workflow_id: Uuid,
        succeeded: bool,
        execution_time_ms: i64,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let workflow = inner
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("Workflow {}", workflow_id)))?;
        workflow.record_run(succeeded, execution_time_ms, at);
        Ok(())
    }

    async fn get_trigger(&self, id: Uuid) -> AppResult<Option<Trigger>> {
        Ok(self.inner.lock().await.triggers.get(&id).cloned())
    }

    async fn save_trigger(&self, trigger: &Trigger) -> AppResult<()> {
        self.inner
            .lock()
            .await
            .triggers
            .insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn claim_trigger_firing(
        &self,
        id: Uuid,
        event_created_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(trigger) = inner.triggers.get_mut(&id) else {
            return Ok(false);
        };
        if trigger.cooldown_remaining(event_created_at).is_some() {
            return Ok(false);
        }
        trigger.last_triggered_at = Some(at);
        trigger.updated_at = at;
        Ok(true)
    }

    async fn enqueue_event(&self, event: &TriggerEvent) -> AppResult<()> {
        self.inner.lock().await.events.push(event.clone());
        Ok(())
    }

    async fn claim_pending_events(&self, limit: usize) -> AppResult<Vec<TriggerEvent>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let lease = chrono::Duration::seconds(EVENT_CLAIM_LEASE_SECS);

        let mut pending: Vec<TriggerEvent> = inner
            .events
            .iter()
            .filter(|e| e.status == TriggerEventStatus::Triggered)
            .filter(|e| {
                inner
                    .event_claims
                    .get(&e.id)
                    .map_or(true, |claimed_at| *claimed_at + lease <= now)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);

        for event in &pending {
            inner.event_claims.insert(event.id, now);
        }
        Ok(pending)
    }

    async fn get_event(&self, id: Uuid) -> AppResult<Option<TriggerEvent>> {
        Ok(self
            .inner
            .lock()
            .await
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn resolve_event(&self, id: Uuid, resolution: &EventResolution) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(event) = inner.events.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if event.status.is_terminal() {
            return Ok(false);
        }
        event.status = resolution.status;
        event.failure_reason = resolution.failure_reason.clone();
        event.processing_time_ms = Some(resolution.processing_time_ms);
        event.workflow_run_id = resolution.workflow_run_id;
        event.processed_at = Some(Utc::now());
        inner.event_claims.remove(&id);
        Ok(true)
    }

    async fn create_run(&self, run: &WorkflowRun) -> AppResult<()> {
        self.inner.lock().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> AppResult<Option<WorkflowRun>> {
        Ok(self.inner.lock().await.runs.get(&id).cloned())
    }

    async fn update_run(&self, run: &WorkflowRun) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.runs.get_mut(&run.id) {
            Some(stored) if stored.status.is_terminal() => Ok(false),
            Some(stored) => {
                *stored = run.clone();
                stored.updated_at = Utc::now();
                Ok(true)
            }
            None => Err(AppError::NotFound(format!("Run {}", run.id))),
        }
    }

    async fn cancel_run(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(run) = inner.runs.get_mut(&id) else {
            return Ok(false);
        };
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = crate::db::models::RunStatus::Cancelled;
        run.completed_at = Some(at);
        run.execution_time_ms = Some(run.elapsed_ms(at));
        run.updated_at = at;
        Ok(true)
    }

    async fn try_lock_run(&self, id: Uuid, token: &str, ttl: Duration) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        if inner.run_locks.get(&id).is_some_and(|(_, until)| *until > now) {
            return Ok(false);
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Config(format!("invalid lock ttl: {}", e)))?;
        inner.run_locks.insert(id, (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn unlock_run(&self, id: Uuid, token: &str) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .run_locks
            .get(&id)
            .is_some_and(|(holder, _)| holder == token)
        {
            inner.run_locks.remove(&id);
        }
        Ok(())
    }

    async fn create_step_run(&self, step_run: &WorkflowStepRun) -> AppResult<()> {
        self.inner.lock().await.step_runs.push(step_run.clone());
        Ok(())
    }

    async fn update_step_run(&self, step_run: &WorkflowStepRun) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .step_runs
            .iter_mut()
            .find(|s| s.id == step_run.id)
            .ok_or_else(|| AppError::NotFound(format!("Step run {}", step_run.id)))?;
        *stored = step_run.clone();
        Ok(())
    }

    async fn get_step_run(&self, id: Uuid) -> AppResult<Option<WorkflowStepRun>> {
        Ok(self
            .inner
            .lock()
            .await
            .step_runs
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn list_step_runs(&self, run_id: Uuid) -> AppResult<Vec<WorkflowStepRun>> {
        Ok(self
            .inner
            .lock()
            .await
            .step_runs
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn record_trigger_metric(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
        outcome: EventOutcome,
        processing_time_ms: f64,
    ) -> AppResult<TriggerMetric> {
        let mut inner = self.inner.lock().await;
        let metric = inner
            .metrics
            .entry((trigger_id, date))
            .or_insert_with(|| TriggerMetric::empty(trigger_id, date));
        metric.record(outcome, processing_time_ms);
        Ok(metric.clone())
    }

    async fn get_trigger_metric(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
    ) -> AppResult<Option<TriggerMetric>> {
        Ok(self
            .inner
            .lock()
            .await
            .metrics
            .get(&(trigger_id, date))
            .cloned())
    }

    async fn schedule_continuation(&self, continuation: &Continuation) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.continuation_claims.remove(&continuation.id);
        match inner
            .continuations
            .iter()
            .position(|c| c.id == continuation.id)
        {
            Some(index) => inner.continuations[index].due_at = continuation.due_at,
            None => inner.continuations.push(continuation.clone()),
        }
        Ok(())
    }

    async fn claim_due_continuations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Continuation>> {
        let mut inner = self.inner.lock().await;
        let lease = chrono::Duration::seconds(CONTINUATION_CLAIM_LEASE_SECS);

        let mut due: Vec<Continuation> = inner
            .continuations
            .iter()
            .filter(|c| c.due_at <= now)
            .filter(|c| {
                inner
                    .continuation_claims
                    .get(&c.id)
                    .map_or(true, |claimed_at| *claimed_at + lease <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| c.due_at);
        due.truncate(limit);

        for continuation in &due {
            inner.continuation_claims.insert(continuation.id, now);
        }
        Ok(due)
    }

    async fn complete_continuation(&self, id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.continuations.retain(|c| c.id != id);
        inner.continuation_claims.remove(&id);
        Ok(())
    }
}
