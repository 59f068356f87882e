//! Per-day trigger metrics.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of processing one trigger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Successful,
    Failed,
    Ignored,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
        };
        f.write_str(s)
    }
}

/// Counters for one (trigger, date) pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TriggerMetric {
    pub trigger_id: Uuid,
    pub metric_date: NaiveDate,
    pub total_events: i64,
    pub successful_triggers: i64,
    pub failed_triggers: i64,
    pub ignored_triggers: i64,
    pub avg_processing_time_ms: f64,
    pub updated_at: DateTime<Utc>,
}

impl TriggerMetric {
    /// Zeroed counters for a new day.
    pub fn empty(trigger_id: Uuid, metric_date: NaiveDate) -> Self {
        Self {
            trigger_id,
            metric_date,
            total_events: 0,
            successful_triggers: 0,
            failed_triggers: 0,
            ignored_triggers: 0,
            avg_processing_time_ms: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Count one event and fold its processing time into the running mean.
    pub fn record(&mut self, outcome: EventOutcome, processing_time_ms: f64) {
        self.total_events += 1;
        match outcome {
            EventOutcome::Successful => self.successful_triggers += 1,
            EventOutcome::Failed => self.failed_triggers += 1,
            EventOutcome::Ignored => self.ignored_triggers += 1,
        }
        self.avg_processing_time_ms =
            incremental_mean(self.avg_processing_time_ms, self.total_events, processing_time_ms);
        self.updated_at = Utc::now();
    }
}

/// `avg' = (avg * (n - 1) + value) / n`, where `n` already counts `value`.
pub fn incremental_mean(avg: f64, n: i64, value: f64) -> f64 {
    if n <= 1 {
        return value;
    }
    let n = n as f64;
    (avg * (n - 1.0) + value) / n
}
