//! Workflow and workflow step queries.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Workflow, WorkflowStep};
use crate::db::DbPool;
use crate::error::AppResult;

/// Get a workflow by id.
pub async fn get_workflow(pool: &DbPool, id: Uuid) -> AppResult<Option<Workflow>> {
    let workflow = sqlx::query_as::<_, Workflow>(
        r#"
        SELECT id, owner_id, name, description, status, version, metadata,
               total_runs, success_runs, failed_runs, success_rate, avg_execution_time_ms,
               last_run_at, deleted_at, created_at, updated_at
        FROM leadflow.workflow
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(workflow)
}

/// Insert or update a workflow definition.
///
/// Run counters are owned by [`record_run`] and are only written on insert.
pub async fn upsert_workflow(pool: &DbPool, workflow: &Workflow) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leadflow.workflow (
            id, owner_id, name, description, status, version, metadata,
            total_runs, success_runs, failed_runs, success_rate, avg_execution_time_ms,
            last_run_at, deleted_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (id) DO UPDATE SET
            owner_id = EXCLUDED.owner_id,
            name = EXCLUDED.name,
            description = EXCLUDED.description,
            status = EXCLUDED.status,
            version = EXCLUDED.version,
            metadata = EXCLUDED.metadata,
            deleted_at = EXCLUDED.deleted_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(workflow.id)
    .bind(workflow.owner_id)
    .bind(&workflow.name)
    .bind(&workflow.description)
    .bind(workflow.status)
    .bind(workflow.version)
    .bind(&workflow.metadata)
    .bind(workflow.total_runs)
    .bind(workflow.success_runs)
    .bind(workflow.failed_runs)
    .bind(workflow.success_rate)
    .bind(workflow.avg_execution_time_ms)
    .bind(workflow.last_run_at)
    .bind(workflow.deleted_at)
    .bind(workflow.created_at)
    .bind(workflow.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fold one finished run into the workflow counters in a single statement.
///
/// Returns `false` if the workflow does not exist.
pub async fn record_run(
    pool: &DbPool,
    workflow_id: Uuid,
    succeeded: bool,
    execution_time_ms: i64,
    at: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE leadflow.workflow
        SET total_runs = total_runs + 1,
            success_runs = success_runs + CASE WHEN $2 THEN 1 ELSE 0 END,
            failed_runs = failed_runs + CASE WHEN $2 THEN 0 ELSE 1 END,
            success_rate = (success_runs + CASE WHEN $2 THEN 1 ELSE 0 END)::double precision
                           / (total_runs + 1)::double precision * 100.0,
            avg_execution_time_ms = (avg_execution_time_ms * total_runs + $3::double precision)
                                    / (total_runs + 1)::double precision,
            last_run_at = $4,
            updated_at = $4
        WHERE id = $1
        "#,
    )
    .bind(workflow_id)
    .bind(succeeded)
    .bind(execution_time_ms)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List the steps of a workflow ordered by position.
pub async fn list_steps(pool: &DbPool, workflow_id: Uuid) -> AppResult<Vec<WorkflowStep>> {
    let steps = sqlx::query_as::<_, WorkflowStep>(
        r#"
        SELECT id, workflow_id, uid, name, step_type, position, config,
               next_step_id, true_branch_step_id, false_branch_step_id,
               error_handling, field_mapping, created_at
        FROM leadflow.workflow_step
        WHERE workflow_id = $1
        ORDER BY position, created_at
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(steps)
}

/// Insert or update a workflow step.
pub async fn upsert_step(pool: &DbPool, step: &WorkflowStep) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leadflow.workflow_step (
            id, workflow_id, uid, name, step_type, position, config,
            next_step_id, true_branch_step_id, false_branch_step_id,
            error_handling, field_mapping, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            uid = EXCLUDED.uid,
            name = EXCLUDED.name,
            step_type = EXCLUDED.step_type,
            position = EXCLUDED.position,
            config = EXCLUDED.config,
            next_step_id = EXCLUDED.next_step_id,
            true_branch_step_id = EXCLUDED.true_branch_step_id,
            false_branch_step_id = EXCLUDED.false_branch_step_id,
            error_handling = EXCLUDED.error_handling,
            field_mapping = EXCLUDED.field_mapping
        "#,
    )
    .bind(step.id)
    .bind(step.workflow_id)
    .bind(&step.uid)
    .bind(&step.name)
    .bind(&step.step_type)
    .bind(step.position)
    .bind(&step.config)
    .bind(step.next_step_id)
    .bind(step.true_branch_step_id)
    .bind(step.false_branch_step_id)
    .bind(&step.error_handling)
    .bind(&step.field_mapping)
    .bind(step.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
