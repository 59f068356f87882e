//! Workflow run and step run queries.
//!
//! Runs carry a lease (`locked_by`, `locked_until`) that serializes graph
//! traversal across processes. Writes to a run are refused once it has
//! reached a terminal status.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{WorkflowRun, WorkflowStepRun};
use crate::db::DbPool;
use crate::error::AppResult;

/// Insert a new run.
pub async fn insert_run(pool: &DbPool, run: &WorkflowRun) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leadflow.workflow_run (
            id, workflow_id, trigger_id, trigger_event_id, status, trigger_data, context_data,
            current_step_id, steps_executed, started_at, completed_at, execution_time_ms,
            error_message, error_details, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(run.id)
    .bind(run.workflow_id)
    .bind(run.trigger_id)
    .bind(run.trigger_event_id)
    .bind(run.status)
    .bind(&run.trigger_data)
    .bind(&run.context_data)
    .bind(run.current_step_id)
    .bind(run.steps_executed)
    .bind(run.started_at)
    .bind(run.completed_at)
    .bind(run.execution_time_ms)
    .bind(&run.error_message)
    .bind(&run.error_details)
    .bind(run.created_at)
    .bind(run.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a run by id.
pub async fn get_run(pool: &DbPool, id: Uuid) -> AppResult<Option<WorkflowRun>> {
    let run = sqlx::query_as::<_, WorkflowRun>(
        r#"
        SELECT id, workflow_id, trigger_id, trigger_event_id, status, trigger_data, context_data,
               current_step_id, steps_executed, started_at, completed_at, execution_time_ms,
               error_message, error_details, created_at, updated_at
        FROM leadflow.workflow_run
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(run)
}

/// Write the mutable state of a run unless it is already terminal.
///
/// Returns `false` when the stored run is terminal and nothing was written.
pub async fn update_run(pool: &DbPool, run: &WorkflowRun) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE leadflow.workflow_run
        SET status = $2,
            context_data = $3,
            current_step_id = $4,
            steps_executed = $5,
            started_at = $6,
            completed_at = $7,
            execution_time_ms = $8,
            error_message = $9,
            error_details = $10,
            updated_at = now()
        WHERE id = $1
          AND status NOT IN ('completed', 'failed', 'cancelled')
        "#,
    )
    .bind(run.id)
    .bind(run.status)
    .bind(&run.context_data)
    .bind(run.current_step_id)
    .bind(run.steps_executed)
    .bind(run.started_at)
    .bind(run.completed_at)
    .bind(run.execution_time_ms)
    .bind(&run.error_message)
    .bind(&run.error_details)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Cancel a non-terminal run.
pub async fn cancel_run(pool: &DbPool, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE leadflow.workflow_run
        SET status = 'cancelled',
            completed_at = $2,
            execution_time_ms = CASE
                WHEN started_at IS NULL THEN 0
                ELSE GREATEST(0, (EXTRACT(EPOCH FROM ($2 - started_at)) * 1000)::bigint)
            END,
            updated_at = $2
        WHERE id = $1
          AND status NOT IN ('completed', 'failed', 'cancelled')
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Take the traversal lease on a run under `token`.
///
/// Succeeds only when the run is unlocked or the previous lease has expired;
/// the lease is never re-entrant.
pub async fn try_lock_run(pool: &DbPool, id: Uuid, token: &str, ttl_secs: f64) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE leadflow.workflow_run
        SET locked_by = $2,
            locked_until = now() + make_interval(secs => $3)
        WHERE id = $1
          AND (locked_by IS NULL OR locked_until < now())
        "#,
    )
    .bind(id)
    .bind(token)
    .bind(ttl_secs)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Release the lease if it is still held under `token`.
pub async fn unlock_run(pool: &DbPool, id: Uuid, token: &str) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE leadflow.workflow_run
        SET locked_by = NULL, locked_until = NULL
        WHERE id = $1 AND locked_by = $2
        "#,
    )
    .bind(id)
    .bind(token)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a step run.
pub async fn insert_step_run(pool: &DbPool, step_run: &WorkflowStepRun) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leadflow.workflow_step_run (
            id, run_id, step_id, step_uid, step_type, status, retry_count,
            input_data, output_data, error_message, error_details,
            started_at, completed_at, resume_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(step_run.id)
    .bind(step_run.run_id)
    .bind(step_run.step_id)
    .bind(&step_run.step_uid)
    .bind(&step_run.step_type)
    .bind(step_run.status)
    .bind(step_run.retry_count)
    .bind(&step_run.input_data)
    .bind(&step_run.output_data)
    .bind(&step_run.error_message)
    .bind(&step_run.error_details)
    .bind(step_run.started_at)
    .bind(step_run.completed_at)
    .bind(step_run.resume_at)
    .bind(step_run.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Update the outcome columns of a step run.
pub async fn update_step_run(pool: &DbPool, step_run: &WorkflowStepRun) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE leadflow.workflow_step_run
        SET status = $2,
            retry_count = $3,
            output_data = $4,
            error_message = $5,
            error_details = $6,
            completed_at = $7,
            resume_at = $8
        WHERE id = $1
        "#,
    )
    .bind(step_run.id)
    .bind(step_run.status)
    .bind(step_run.retry_count)
    .bind(&step_run.output_data)
    .bind(&step_run.error_message)
    .bind(&step_run.error_details)
    .bind(step_run.completed_at)
    .bind(step_run.resume_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a step run by id.
pub async fn get_step_run(pool: &DbPool, id: Uuid) -> AppResult<Option<WorkflowStepRun>> {
    let step_run = sqlx::query_as::<_, WorkflowStepRun>(
        r#"
        SELECT id, run_id, step_id, step_uid, step_type, status, retry_count,
               input_data, output_data, error_message, error_details,
               started_at, completed_at, resume_at, created_at
        FROM leadflow.workflow_step_run
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(step_run)
}

/// List the step runs of a run in creation order.
pub async fn list_step_runs(pool: &DbPool, run_id: Uuid) -> AppResult<Vec<WorkflowStepRun>> {
    let step_runs = sqlx::query_as::<_, WorkflowStepRun>(
        r#"
        SELECT id, run_id, step_id, step_uid, step_type, status, retry_count,
               input_data, output_data, error_message, error_details,
               started_at, completed_at, resume_at, created_at
        FROM leadflow.workflow_step_run
        WHERE run_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(step_runs)
}
