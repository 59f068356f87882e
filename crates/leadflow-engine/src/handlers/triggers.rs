//! Trigger API handlers: event intake, dry-run and per-day metrics.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::models::{TriggerEvent, TriggerMetric};
use crate::error::{AppError, AppResult};
use crate::services::TriggerTestResult;
use crate::state::AppState;

/// Query parameters for the metrics endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsQuery {
    /// Day to report, defaults to today (UTC)
    pub date: Option<NaiveDate>,
}

/// Response for an accepted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub event_id: Uuid,
    pub trigger_id: Uuid,
    pub status: String,
}

impl From<TriggerEvent> for EnqueueResponse {
    fn from(event: TriggerEvent) -> Self {
        Self {
            event_id: event.id,
            trigger_id: event.trigger_id,
            status: event.status.to_string(),
        }
    }
}

fn require_object(payload: &Value) -> AppResult<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(AppError::Validation(
            "Event payload must be a JSON object".to_string(),
        ))
    }
}

/// Queue an event for a trigger.
///
/// POST /api/triggers/{trigger_id}/events
pub async fn enqueue_event(
    State(state): State<AppState>,
    Path(trigger_id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> AppResult<(StatusCode, Json<EnqueueResponse>)> {
    require_object(&payload)?;
    let event = state.gateway.enqueue(trigger_id, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(event.into())))
}

/// Evaluate a payload against a trigger without side effects.
///
/// POST /api/triggers/{trigger_id}/test
pub async fn test_trigger(
    State(state): State<AppState>,
    Path(trigger_id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> AppResult<Json<TriggerTestResult>> {
    require_object(&payload)?;
    let result = state.gateway.test_trigger(trigger_id, &payload).await?;
    Ok(Json(result))
}

/// Per-day counters for a trigger. Days without events report zeros.
///
/// GET /api/triggers/{trigger_id}/metrics?date=YYYY-MM-DD
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(trigger_id): Path<Uuid>,
    Query(query): Query<MetricsQuery>,
) -> AppResult<Json<TriggerMetric>> {
    if state.store.get_trigger(trigger_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Trigger {}", trigger_id)));
    }
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let metric = state
        .metrics
        .trigger_metric(trigger_id, date)
        .await?
        .unwrap_or_else(|| TriggerMetric::empty(trigger_id, date));
    Ok(Json(metric))
}
