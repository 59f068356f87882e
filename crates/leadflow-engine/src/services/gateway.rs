//! Trigger gateway: turns queued trigger events into workflow runs.
//!
//! Each batch claims pending events oldest first and partitions them by
//! trigger. Partitions run concurrently (bounded by `concurrency`); events of
//! one trigger are processed strictly in order, so a trigger with a cooldown
//! can never fire twice from the same batch.
//!
//! Processing never raises: every event ends `processed`, `ignored` or
//! `failed` with a reason, and one bad event never stalls the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::models::{EventOutcome, EventResolution, TriggerEvent, TriggerEventStatus};
use crate::engine::condition::ConditionEvaluator;
use crate::engine::executor::{ExecutionEngine, RunOrigin};
use crate::engine::mapper;
use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;
use crate::store::RunStore;

use super::metrics::MetricsAggregator;

/// Batches slower than this are logged at warn level.
const SLOW_BATCH_MS: u128 = 5_000;

pub const REASON_TRIGGER_NOT_FOUND: &str = "Trigger not found";
pub const REASON_TRIGGER_INACTIVE: &str = "Trigger is inactive";
pub const REASON_COOLDOWN: &str = "Trigger is in cooldown period";
pub const REASON_WORKFLOW_INACTIVE: &str = "Workflow is not active";
pub const REASON_CONDITIONS_NOT_MET: &str = "Trigger conditions not met";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Events claimed per batch.
    pub batch_size: usize,
    /// Trigger partitions processed in parallel.
    pub concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 4,
        }
    }
}

/// Counts for one `process_pending` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub processed: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl BatchReport {
    fn count(&mut self, status: TriggerEventStatus) {
        match status {
            TriggerEventStatus::Processed => self.processed += 1,
            TriggerEventStatus::Ignored => self.ignored += 1,
            TriggerEventStatus::Failed => self.failed += 1,
            TriggerEventStatus::Triggered => {}
        }
    }
}

/// Dry-run result of [`TriggerGateway::test_trigger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerTestResult {
    pub trigger_id: Uuid,
    pub is_active: bool,
    pub workflow_executable: bool,
    pub conditions_met: bool,
    /// Seconds until the trigger may fire again, if in cooldown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_seconds: Option<i64>,
    pub would_fire: bool,
    /// Reason the event would be ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Workflow input the payload maps to.
    pub mapped_input: Value,
}

/// Outcome of evaluating one event before it is written back.
enum Decision {
    Processed { run_id: Uuid },
    Ignored(&'static str),
    TriggerMissing,
}

#[derive(Clone)]
pub struct TriggerGateway {
    store: Arc<dyn RunStore>,
    engine: Arc<ExecutionEngine>,
    metrics: MetricsAggregator,
    evaluator: ConditionEvaluator,
    config: GatewayConfig,
}

impl TriggerGateway {
    pub fn new(store: Arc<dyn RunStore>, engine: Arc<ExecutionEngine>, config: GatewayConfig) -> Self {
        Self {
            metrics: MetricsAggregator::new(store.clone()),
            store,
            engine,
            evaluator: ConditionEvaluator::new(),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Append an event for `trigger_id` in `triggered` status.
    pub async fn enqueue(&self, trigger_id: Uuid, payload: Value) -> AppResult<TriggerEvent> {
        if self.store.get_trigger(trigger_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Trigger {}", trigger_id)));
        }
        let event = TriggerEvent::new(trigger_id, payload);
        self.store.enqueue_event(&event).await?;

        debug!(event_id = %event.id, trigger_id = %trigger_id, "Trigger event queued");
        Ok(event)
    }

    /// Process up to `limit` pending events.
    pub async fn process_pending(&self, limit: usize) -> AppResult<BatchReport> {
        let started = Instant::now();
        let events = self.store.claim_pending_events(limit).await?;
        let mut report = BatchReport {
            claimed: events.len(),
            ..BatchReport::default()
        };
        if events.is_empty() {
            return Ok(report);
        }

        let partitions = self.order_by_priority(partition_by_trigger(events)).await;
        let partition_count = partitions.len();
        let statuses: Vec<Vec<TriggerEventStatus>> = stream::iter(partitions)
            .map(|events| self.process_partition(events))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for status in statuses.into_iter().flatten() {
            report.count(status);
        }

        let elapsed = started.elapsed();
        tracing::info!(
            target: "leadflow.performance",
            duration_ms = elapsed.as_millis() as u64,
            event_count = report.claimed,
            trigger_count = partition_count,
            processed = report.processed,
            ignored = report.ignored,
            failed = report.failed,
            "Trigger batch processed"
        );
        if elapsed.as_millis() > SLOW_BATCH_MS {
            warn!(
                target: "leadflow.performance",
                duration_ms = elapsed.as_millis() as u64,
                event_count = report.claimed,
                "Slow trigger batch"
            );
        }

        Ok(report)
    }

    /// Dispatch lower-priority-value triggers first. Event order inside a
    /// partition is untouched.
    async fn order_by_priority(&self, partitions: Vec<Vec<TriggerEvent>>) -> Vec<Vec<TriggerEvent>> {
        let mut keyed = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let priority = match partition.first() {
                Some(event) => self
                    .store
                    .get_trigger(event.trigger_id)
                    .await
                    .log("loading trigger priority")
                    .ok()
                    .flatten()
                    .map_or(i32::MAX, |t| t.priority),
                None => i32::MAX,
            };
            keyed.push((priority, partition));
        }
        keyed.sort_by_key(|(priority, _)| *priority);
        keyed.into_iter().map(|(_, partition)| partition).collect()
    }

    async fn process_partition(&self, events: Vec<TriggerEvent>) -> Vec<TriggerEventStatus> {
        let mut statuses = Vec::with_capacity(events.len());
        for event in &events {
            statuses.push(self.process_event(event).await.status);
        }
        statuses
    }

    /// Process one event to a terminal status and record its metrics.
    pub async fn process_event(&self, event: &TriggerEvent) -> EventResolution {
        let started = Instant::now();
        let decision = self.decide(event).await;
        let processing_time_ms = started.elapsed().as_millis() as i64;

        let (resolution, outcome) = match decision {
            Ok(Decision::Processed { run_id }) => (
                EventResolution {
                    status: TriggerEventStatus::Processed,
                    failure_reason: None,
                    processing_time_ms,
                    workflow_run_id: Some(run_id),
                },
                Some(EventOutcome::Successful),
            ),
            Ok(Decision::Ignored(reason)) => (
                ignored(reason, processing_time_ms),
                Some(EventOutcome::Ignored),
            ),
            Ok(Decision::TriggerMissing) => (ignored(REASON_TRIGGER_NOT_FOUND, processing_time_ms), None),
            Err(e) => (
                EventResolution {
                    status: TriggerEventStatus::Failed,
                    failure_reason: Some(e.to_string()),
                    processing_time_ms,
                    workflow_run_id: None,
                },
                Some(EventOutcome::Failed),
            ),
        };

        match resolution.status {
            TriggerEventStatus::Processed => info!(
                event_id = %event.id,
                trigger_id = %event.trigger_id,
                run_id = ?resolution.workflow_run_id,
                processing_time_ms,
                "Trigger event processed"
            ),
            TriggerEventStatus::Failed => warn!(
                event_id = %event.id,
                trigger_id = %event.trigger_id,
                reason = resolution.failure_reason.as_deref().unwrap_or(""),
                "Trigger event failed"
            ),
            _ => debug!(
                event_id = %event.id,
                trigger_id = %event.trigger_id,
                reason = resolution.failure_reason.as_deref().unwrap_or(""),
                "Trigger event ignored"
            ),
        }

        let _ = self
            .store
            .resolve_event(event.id, &resolution)
            .await
            .log("resolving trigger event");

        if let Some(outcome) = outcome {
            let _ = self
                .metrics
                .record(event.trigger_id, Utc::now().date_naive(), outcome, processing_time_ms)
                .await
                .log("recording trigger metric");
        }

        resolution
    }

    async fn decide(&self, event: &TriggerEvent) -> AppResult<Decision> {
        let Some(trigger) = self.store.get_trigger(event.trigger_id).await? else {
            return Ok(Decision::TriggerMissing);
        };
        if !trigger.is_active {
            return Ok(Decision::Ignored(REASON_TRIGGER_INACTIVE));
        }
        if trigger.cooldown_remaining(event.created_at).is_some() {
            return Ok(Decision::Ignored(REASON_COOLDOWN));
        }

        let executable = self
            .store
            .get_workflow(trigger.workflow_id)
            .await?
            .is_some_and(|w| w.is_executable());
        if !executable {
            return Ok(Decision::Ignored(REASON_WORKFLOW_INACTIVE));
        }

        let clauses = trigger
            .condition_clauses()
            .map_err(|e| AppError::Validation(format!("Invalid trigger conditions: {}", e)))?;
        if !self.evaluator.evaluate(&event.payload, &clauses) {
            return Ok(Decision::Ignored(REASON_CONDITIONS_NOT_MET));
        }

        let mappings = trigger
            .field_mappings()
            .map_err(|e| AppError::Validation(format!("Invalid trigger field mapping: {}", e)))?;
        let input = mapper::map_payload(&event.payload, &mappings);

        // The read above is advisory; concurrent gateways race here.
        if !self
            .store
            .claim_trigger_firing(trigger.id, event.created_at, Utc::now())
            .await?
        {
            return Ok(Decision::Ignored(REASON_COOLDOWN));
        }

        let run = self
            .engine
            .start_run(
                trigger.workflow_id,
                input,
                RunOrigin::Trigger {
                    trigger_id: trigger.id,
                    event_id: Some(event.id),
                },
            )
            .await?;

        Ok(Decision::Processed { run_id: run.id })
    }

    /// Evaluate a payload against a trigger without side effects.
    pub async fn test_trigger(&self, trigger_id: Uuid, payload: &Value) -> AppResult<TriggerTestResult> {
        let trigger = self
            .store
            .get_trigger(trigger_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Trigger {}", trigger_id)))?;

        let workflow_executable = self
            .store
            .get_workflow(trigger.workflow_id)
            .await?
            .is_some_and(|w| w.is_executable());
        let clauses = trigger
            .condition_clauses()
            .map_err(|e| AppError::Validation(format!("Invalid trigger conditions: {}", e)))?;
        let mappings = trigger
            .field_mappings()
            .map_err(|e| AppError::Validation(format!("Invalid trigger field mapping: {}", e)))?;

        let conditions_met = self.evaluator.evaluate(payload, &clauses);
        let cooldown_remaining_seconds = trigger
            .cooldown_remaining(Utc::now())
            .map(|d| d.num_seconds().max(1));

        let reason = if !trigger.is_active {
            Some(REASON_TRIGGER_INACTIVE)
        } else if cooldown_remaining_seconds.is_some() {
            Some(REASON_COOLDOWN)
        } else if !workflow_executable {
            Some(REASON_WORKFLOW_INACTIVE)
        } else if !conditions_met {
            Some(REASON_CONDITIONS_NOT_MET)
        } else {
            None
        };

        Ok(TriggerTestResult {
            trigger_id,
            is_active: trigger.is_active,
            workflow_executable,
            conditions_met,
            cooldown_remaining_seconds,
            would_fire: reason.is_none(),
            reason: reason.map(str::to_string),
            mapped_input: mapper::map_payload(payload, &mappings),
        })
    }
}

fn ignored(reason: &str, processing_time_ms: i64) -> EventResolution {
    EventResolution {
        status: TriggerEventStatus::Ignored,
        failure_reason: Some(reason.to_string()),
        processing_time_ms,
        workflow_run_id: None,
    }
}

/// Group events by trigger, keeping first-seen trigger order and event order.
fn partition_by_trigger(events: Vec<TriggerEvent>) -> Vec<Vec<TriggerEvent>> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut partitions: Vec<Vec<TriggerEvent>> = Vec::new();
    for event in events {
        match index.get(&event.trigger_id) {
            Some(&i) => partitions[i].push(event),
            None => {
                index.insert(event.trigger_id, partitions.len());
                partitions.push(vec![event]);
            }
        }
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    use async_trait::async_trait;
    use leadflow_actions::{Action, ActionError, ActionRegistry};

    use crate::db::models::{
        RunStatus, Trigger, TriggerType, Workflow, WorkflowStatus, WorkflowStep,
    };
    use crate::engine::executor::EngineConfig;
    use crate::engine::scheduler::StoreScheduler;
    use crate::store::MemoryStore;

    struct RecordAction;

    #[async_trait]
    impl Action for RecordAction {
        fn name(&self) -> &'static str {
            "record"
        }

        async fn execute(&self, _config: &Value, input: &Value) -> Result<Value, ActionError> {
            Ok(input["trigger_data"].clone())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: TriggerGateway,
        workflow: Workflow,
    }

    /// A gateway with its own inline engine over `store`.
    fn gateway_over(store: Arc<MemoryStore>) -> TriggerGateway {
        let mut actions = ActionRegistry::new();
        actions.register(RecordAction);

        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            Arc::new(actions),
            Arc::new(StoreScheduler::new(store.clone())),
            EngineConfig {
                detached_runs: false,
                ..EngineConfig::default()
            },
        ));
        TriggerGateway::new(store, engine, GatewayConfig::default())
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let gateway = gateway_over(store.clone());

            let mut workflow = Workflow::new("New lead follow-up");
            workflow.status = WorkflowStatus::Active;
            store.save_workflow(&workflow).await.unwrap();
            let step = WorkflowStep::new(workflow.id, "record", "action", json!({"action_type": "record"}));
            store.save_step(&step).await.unwrap();

            Self {
                store,
                gateway,
                workflow,
            }
        }

        /// The trigger from the documented scenario.
        async fn new_lead_trigger(&self) -> Trigger {
            let mut trigger = Trigger::new(self.workflow.id, "New lead", TriggerType::DatabaseEvent);
            trigger.cooldown_seconds = 60;
            trigger.conditions = json!([{"field": "status", "operator": "equals", "value": "new"}]);
            self.store.save_trigger(&trigger).await.unwrap();
            trigger
        }

        async fn event(&self, id: Uuid) -> TriggerEvent {
            self.store.get_event(id).await.unwrap().unwrap()
        }

        async fn trigger(&self, id: Uuid) -> Trigger {
            self.store.get_trigger(id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_partitions_ordered_by_trigger_priority() {
        let f = Fixture::new().await;
        let mut low = Trigger::new(f.workflow.id, "Newsletter", TriggerType::Webhook);
        low.priority = 5;
        f.store.save_trigger(&low).await.unwrap();
        let mut high = Trigger::new(f.workflow.id, "Demo request", TriggerType::Webhook);
        high.priority = 1;
        f.store.save_trigger(&high).await.unwrap();

        let partitions = vec![
            vec![TriggerEvent::new(low.id, json!({}))],
            vec![TriggerEvent::new(Uuid::new_v4(), json!({}))],
            vec![TriggerEvent::new(high.id, json!({}))],
        ];
        let ordered: Vec<Uuid> = f
            .gateway
            .order_by_priority(partitions)
            .await
            .iter()
            .map(|p| p[0].trigger_id)
            .collect();

        assert_eq!(ordered[0], high.id);
        assert_eq!(ordered[1], low.id);
    }

    #[tokio::test]
    async fn test_matching_event_is_processed() {
        let f = Fixture::new().await;
        let trigger = f.new_lead_trigger().await;
        let event = f
            .gateway
            .enqueue(trigger.id, json!({"status": "new", "email": "a@b.com"}))
            .await
            .unwrap();

        let report = f.gateway.process_pending(10).await.unwrap();
        assert_eq!(report.processed, 1);

        let event = f.event(event.id).await;
        assert_eq!(event.status, TriggerEventStatus::Processed);
        assert!(event.processed_at.is_some());
        assert!(event.processing_time_ms.is_some());

        let run = f
            .store
            .get_run(event.workflow_run_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.trigger_id, Some(trigger.id));
        assert_eq!(run.trigger_event_id, Some(event.id));
        assert_eq!(run.context_data["step_record"]["email"], "a@b.com");

        assert!(f.trigger(trigger.id).await.last_triggered_at.is_some());

        let metric = f
            .store
            .get_trigger_metric(trigger.id, Utc::now().date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.successful_triggers, 1);
        assert_eq!(metric.total_events, 1);
    }

    #[tokio::test]
    async fn test_unmatched_event_is_ignored() {
        let f = Fixture::new().await;
        let trigger = f.new_lead_trigger().await;
        let event = f.gateway.enqueue(trigger.id, json!({"status": "old"})).await.unwrap();

        f.gateway.process_pending(10).await.unwrap();

        let event = f.event(event.id).await;
        assert_eq!(event.status, TriggerEventStatus::Ignored);
        assert_eq!(event.failure_reason.as_deref(), Some(REASON_CONDITIONS_NOT_MET));
        assert!(event.workflow_run_id.is_none());
        assert!(f.trigger(trigger.id).await.last_triggered_at.is_none());

        let metric = f
            .store
            .get_trigger_metric(trigger.id, Utc::now().date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.ignored_triggers, 1);
        assert_eq!(metric.successful_triggers, 0);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_event() {
        let f = Fixture::new().await;
        let trigger = f.new_lead_trigger().await;
        let first = f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();
        let second = f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();

        let report = f.gateway.process_pending(10).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.ignored, 1);

        assert_eq!(f.event(first.id).await.status, TriggerEventStatus::Processed);
        let second = f.event(second.id).await;
        assert_eq!(second.status, TriggerEventStatus::Ignored);
        assert_eq!(second.failure_reason.as_deref(), Some(REASON_COOLDOWN));
    }

    #[tokio::test]
    async fn test_cooldown_holds_across_concurrent_gateways() {
        let f = Fixture::new().await;
        let trigger = f.new_lead_trigger().await;
        let other = gateway_over(f.store.clone());
        let first = f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();
        let second = f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();

        let (a, b) = tokio::join!(f.gateway.process_pending(1), other.process_pending(1));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.claimed + b.claimed, 2);
        assert_eq!(a.processed + b.processed, 1);
        assert_eq!(a.ignored + b.ignored, 1);

        let statuses = [f.event(first.id).await, f.event(second.id).await];
        let fired: Vec<_> = statuses
            .iter()
            .filter(|e| e.status == TriggerEventStatus::Processed)
            .collect();
        assert_eq!(fired.len(), 1);
        let blocked = statuses
            .iter()
            .find(|e| e.status == TriggerEventStatus::Ignored)
            .unwrap();
        assert_eq!(blocked.failure_reason.as_deref(), Some(REASON_COOLDOWN));
    }

    #[tokio::test]
    async fn test_invalid_date_pattern_does_not_stall_batch() {
        let f = Fixture::new().await;
        let mut trigger = f.new_lead_trigger().await;
        trigger.field_mapping = json!([
            {"source": "signup", "target": "signup", "transform": "date_format:%Q"}
        ]);
        f.store.save_trigger(&trigger).await.unwrap();

        let event = f
            .gateway
            .enqueue(trigger.id, json!({"status": "new", "signup": "2024-03-05"}))
            .await
            .unwrap();
        let report = f.gateway.process_pending(10).await.unwrap();
        assert_eq!(report.processed, 1);

        let event = f.event(event.id).await;
        let run = f
            .store
            .get_run(event.workflow_run_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.trigger_data["signup"], "2024-03-05");

        let dry_run = f
            .gateway
            .test_trigger(trigger.id, &json!({"status": "new", "signup": "2024-03-05"}))
            .await
            .unwrap();
        assert_eq!(dry_run.mapped_input["signup"], "2024-03-05");
    }

    #[tokio::test]
    async fn test_event_after_cooldown_fires() {
        let f = Fixture::new().await;
        let mut trigger = f.new_lead_trigger().await;
        trigger.last_triggered_at = Some(Utc::now() - Duration::seconds(61));
        f.store.save_trigger(&trigger).await.unwrap();

        let event = f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();
        f.gateway.process_pending(10).await.unwrap();
        assert_eq!(f.event(event.id).await.status, TriggerEventStatus::Processed);
    }

    #[tokio::test]
    async fn test_inactive_trigger_and_workflow() {
        let f = Fixture::new().await;
        let mut trigger = f.new_lead_trigger().await;
        trigger.is_active = false;
        f.store.save_trigger(&trigger).await.unwrap();

        let event = f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();
        f.gateway.process_pending(10).await.unwrap();
        assert_eq!(
            f.event(event.id).await.failure_reason.as_deref(),
            Some(REASON_TRIGGER_INACTIVE)
        );

        trigger.is_active = true;
        f.store.save_trigger(&trigger).await.unwrap();
        let mut workflow = f.workflow.clone();
        workflow.deleted_at = Some(Utc::now());
        f.store.save_workflow(&workflow).await.unwrap();

        let event = f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();
        f.gateway.process_pending(10).await.unwrap();
        let event = f.event(event.id).await;
        assert_eq!(event.status, TriggerEventStatus::Ignored);
        assert_eq!(event.failure_reason.as_deref(), Some(REASON_WORKFLOW_INACTIVE));
    }

    #[tokio::test]
    async fn test_missing_trigger_is_ignored_without_metrics() {
        let f = Fixture::new().await;
        let orphan = TriggerEvent::new(Uuid::new_v4(), json!({"status": "new"}));
        f.store.enqueue_event(&orphan).await.unwrap();

        f.gateway.process_pending(10).await.unwrap();
        let event = f.event(orphan.id).await;
        assert_eq!(event.status, TriggerEventStatus::Ignored);
        assert_eq!(event.failure_reason.as_deref(), Some(REASON_TRIGGER_NOT_FOUND));
        assert!(f
            .store
            .get_trigger_metric(orphan.trigger_id, Utc::now().date_naive())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_bad_event_does_not_stall_batch() {
        let f = Fixture::new().await;
        let mut broken = Trigger::new(f.workflow.id, "Broken", TriggerType::Webhook);
        broken.conditions = json!("status == new");
        f.store.save_trigger(&broken).await.unwrap();
        let healthy = f.new_lead_trigger().await;

        let bad = f.gateway.enqueue(broken.id, json!({"status": "new"})).await.unwrap();
        let good = f.gateway.enqueue(healthy.id, json!({"status": "new"})).await.unwrap();

        let report = f.gateway.process_pending(10).await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed, 1);

        let bad = f.event(bad.id).await;
        assert_eq!(bad.status, TriggerEventStatus::Failed);
        assert!(bad.failure_reason.unwrap().contains("Invalid trigger conditions"));
        assert_eq!(f.event(good.id).await.status, TriggerEventStatus::Processed);
    }

    #[tokio::test]
    async fn test_field_mapping_shapes_workflow_input() {
        let f = Fixture::new().await;
        let mut trigger = f.new_lead_trigger().await;
        trigger.field_mapping = json!([
            {"source": "email", "target": "email", "transform": "lowercase"},
            {"source": "status", "target": "lead.status"}
        ]);
        f.store.save_trigger(&trigger).await.unwrap();

        let event = f
            .gateway
            .enqueue(trigger.id, json!({"status": "new", "email": "A@B.COM", "noise": 1}))
            .await
            .unwrap();
        f.gateway.process_pending(10).await.unwrap();

        let run_id = f.event(event.id).await.workflow_run_id.unwrap();
        let run = f.store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.trigger_data, json!({"email": "a@b.com", "lead": {"status": "new"}}));
    }

    #[tokio::test]
    async fn test_metrics_across_batches() {
        let f = Fixture::new().await;
        let mut trigger = f.new_lead_trigger().await;
        trigger.cooldown_seconds = 0;
        f.store.save_trigger(&trigger).await.unwrap();

        for _ in 0..3 {
            f.gateway.enqueue(trigger.id, json!({"status": "new"})).await.unwrap();
        }
        let report = f.gateway.process_pending(2).await.unwrap();
        assert_eq!(report.claimed, 2);
        let report = f.gateway.process_pending(2).await.unwrap();
        assert_eq!(report.claimed, 1);

        let metric = f
            .store
            .get_trigger_metric(trigger.id, Utc::now().date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.total_events, 3);
        assert_eq!(metric.successful_triggers, 3);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_trigger() {
        let f = Fixture::new().await;
        let err = f.gateway.enqueue(Uuid::new_v4(), json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_trigger_dry_run_has_no_side_effects() {
        let f = Fixture::new().await;
        let trigger = f.new_lead_trigger().await;

        let result = f
            .gateway
            .test_trigger(trigger.id, &json!({"status": "new", "email": "a@b.com"}))
            .await
            .unwrap();
        assert!(result.would_fire);
        assert!(result.conditions_met);
        assert_eq!(result.mapped_input["email"], "a@b.com");

        let result = f.gateway.test_trigger(trigger.id, &json!({"status": "old"})).await.unwrap();
        assert!(!result.would_fire);
        assert_eq!(result.reason.as_deref(), Some(REASON_CONDITIONS_NOT_MET));

        assert!(f.trigger(trigger.id).await.last_triggered_at.is_none());
        assert!(f.store.claim_pending_events(10).await.unwrap().is_empty());
        assert!(f
            .store
            .get_trigger_metric(trigger.id, Utc::now().date_naive())
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_partition_keeps_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let events = vec![
            TriggerEvent::new(a, json!({"n": 1})),
            TriggerEvent::new(b, json!({"n": 2})),
            TriggerEvent::new(a, json!({"n": 3})),
        ];
        let partitions = partition_by_trigger(events);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].len(), 2);
        assert_eq!(partitions[0][0].payload["n"], 1);
        assert_eq!(partitions[0][1].payload["n"], 3);
        assert_eq!(partitions[1][0].payload["n"], 2);
    }
}
