//! Workflow and run API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::models::{RunDetail, Workflow, WorkflowRun};
use crate::engine::RunOrigin;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Request body for a manual run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRunRequest {
    /// Workflow input, exposed to steps as `trigger_data`
    #[serde(default)]
    pub input: Value,
}

/// Get a workflow with its rolling run counters.
///
/// GET /api/workflows/{workflow_id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> AppResult<Json<Workflow>> {
    let workflow = state
        .store
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Workflow {}", workflow_id)))?;
    Ok(Json(workflow))
}

/// Start a run of a workflow directly.
///
/// POST /api/workflows/{workflow_id}/runs
pub async fn start_run(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(request): Json<StartRunRequest>,
) -> AppResult<(StatusCode, Json<WorkflowRun>)> {
    let input = if request.input.is_null() {
        serde_json::json!({})
    } else {
        request.input
    };
    let run = state
        .engine
        .start_run(workflow_id, input, RunOrigin::Manual)
        .await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// Get a run with its step attempt trail.
///
/// GET /api/runs/{run_id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> AppResult<Json<RunDetail>> {
    Ok(Json(state.engine.run_detail(run_id).await?))
}

/// Cancel a run that has not finished.
///
/// POST /api/runs/{run_id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> AppResult<Json<WorkflowRun>> {
    Ok(Json(state.engine.cancel(run_id).await?))
}
