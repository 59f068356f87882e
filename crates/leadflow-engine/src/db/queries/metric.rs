//! Trigger metric queries.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::db::models::{EventOutcome, TriggerMetric};
use crate::db::DbPool;
use crate::error::AppResult;

/// Count one event against the `(trigger_id, metric_date)` row.
///
/// Creates the row on first use. The increment and the running average are
/// computed by the database in one statement, so concurrent callers never
/// lose an update.
pub async fn record_event(
    pool: &DbPool,
    trigger_id: Uuid,
    metric_date: NaiveDate,
    outcome: EventOutcome,
    processing_time_ms: f64,
) -> AppResult<TriggerMetric> {
    let (successful, failed, ignored): (i64, i64, i64) = match outcome {
        EventOutcome::Successful => (1, 0, 0),
        EventOutcome::Failed => (0, 1, 0),
        EventOutcome::Ignored => (0, 0, 1),
    };

    let metric = sqlx::query_as::<_, TriggerMetric>(
        r#"
        INSERT INTO leadflow.trigger_metric AS m (
            trigger_id, metric_date, total_events, successful_triggers,
            failed_triggers, ignored_triggers, avg_processing_time_ms, updated_at
        )
        VALUES ($1, $2, 1, $3, $4, $5, $6, now())
        ON CONFLICT (trigger_id, metric_date) DO UPDATE SET
            total_events = m.total_events + 1,
            successful_triggers = m.successful_triggers + EXCLUDED.successful_triggers,
            failed_triggers = m.failed_triggers + EXCLUDED.failed_triggers,
            ignored_triggers = m.ignored_triggers + EXCLUDED.ignored_triggers,
            avg_processing_time_ms = (m.avg_processing_time_ms * m.total_events
                                      + EXCLUDED.avg_processing_time_ms)
                                     / (m.total_events + 1)::double precision,
            updated_at = now()
        RETURNING trigger_id, metric_date, total_events, successful_triggers,
                  failed_triggers, ignored_triggers, avg_processing_time_ms, updated_at
        "#,
    )
    .bind(trigger_id)
    .bind(metric_date)
    .bind(successful)
    .bind(failed)
    .bind(ignored)
    .bind(processing_time_ms)
    .fetch_one(pool)
    .await?;

    Ok(metric)
}

/// Get the metric row for a trigger and day.
pub async fn get_metric(
    pool: &DbPool,
    trigger_id: Uuid,
    metric_date: NaiveDate,
) -> AppResult<Option<TriggerMetric>> {
    let metric = sqlx::query_as::<_, TriggerMetric>(
        r#"
        SELECT trigger_id, metric_date, total_events, successful_triggers,
               failed_triggers, ignored_triggers, avg_processing_time_ms, updated_at
        FROM leadflow.trigger_metric
        WHERE trigger_id = $1 AND metric_date = $2
        "#,
    )
    .bind(trigger_id)
    .bind(metric_date)
    .fetch_optional(pool)
    .await?;

    Ok(metric)
}
