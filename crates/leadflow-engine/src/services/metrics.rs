//! Metrics aggregation for triggers and workflows.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::models::{EventOutcome, TriggerMetric};
use crate::error::AppResult;
use crate::store::RunStore;

/// Maintains per-day trigger counters and workflow rolling counters.
///
/// All writes go through the store's atomic increment operations, so any
/// number of gateways and engines may record concurrently.
#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn RunStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Count one processed event for `(trigger_id, date)`.
    pub async fn record(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
        outcome: EventOutcome,
        processing_time_ms: i64,
    ) -> AppResult<TriggerMetric> {
        let metric = self
            .store
            .record_trigger_metric(trigger_id, date, outcome, processing_time_ms as f64)
            .await?;

        tracing::debug!(
            trigger_id = %trigger_id,
            date = %date,
            outcome = %outcome,
            total_events = metric.total_events,
            avg_processing_time_ms = metric.avg_processing_time_ms,
            "Trigger metric recorded"
        );
        Ok(metric)
    }

    /// Fold a completed or failed run into its workflow's counters.
    pub async fn record_workflow_run(
        &self,
        workflow_id: Uuid,
        succeeded: bool,
        execution_time_ms: i64,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.store
            .record_workflow_run(workflow_id, succeeded, execution_time_ms, at)
            .await
    }

    pub async fn trigger_metric(
        &self,
        trigger_id: Uuid,
        date: NaiveDate,
    ) -> AppResult<Option<TriggerMetric>> {
        self.store.get_trigger_metric(trigger_id, date).await
    }
}
