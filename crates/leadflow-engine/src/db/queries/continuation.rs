//! Continuation queries.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::Continuation;
use crate::db::DbPool;
use crate::error::AppResult;

/// Seconds before a claimed but unacknowledged continuation may be claimed
/// again.
pub const CONTINUATION_CLAIM_LEASE_SECS: i64 = 300;

/// Persist a continuation. Re-inserting an existing id moves its due time
/// and releases its claim.
pub async fn insert_continuation(pool: &DbPool, continuation: &Continuation) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leadflow.continuation (
            id, run_id, kind, step_id, attempt, previous_step_run_id, due_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            due_at = EXCLUDED.due_at,
            claimed_at = NULL
        "#,
    )
    .bind(continuation.id)
    .bind(continuation.run_id)
    .bind(continuation.kind)
    .bind(continuation.step_id)
    .bind(continuation.attempt)
    .bind(continuation.previous_step_run_id)
    .bind(continuation.due_at)
    .bind(continuation.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim up to `limit` continuations due at or before `now`, earliest first.
///
/// Rows locked by another sweeper are skipped. Claims older than
/// [`CONTINUATION_CLAIM_LEASE_SECS`] are eligible again, so a continuation
/// survives a sweeper that dies before acknowledging it.
pub async fn claim_due(
    pool: &DbPool,
    now: DateTime<Utc>,
    limit: i64,
) -> AppResult<Vec<Continuation>> {
    let continuations = sqlx::query_as::<_, Continuation>(
        r#"
        WITH claimed AS (
            UPDATE leadflow.continuation
            SET claimed_at = $1
            WHERE id IN (
                SELECT id
                FROM leadflow.continuation
                WHERE due_at <= $1
                  AND (claimed_at IS NULL OR claimed_at + make_interval(secs => $3) <= $1)
                ORDER BY due_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, run_id, kind, step_id, attempt, previous_step_run_id, due_at, created_at
        )
        SELECT * FROM claimed
        ORDER BY due_at
        "#,
    )
    .bind(now)
    .bind(limit)
    .bind(CONTINUATION_CLAIM_LEASE_SECS as f64)
    .fetch_all(pool)
    .await?;

    Ok(continuations)
}

/// Remove an acknowledged continuation.
pub async fn delete_continuation(pool: &DbPool, id: Uuid) -> AppResult<()> {
    sqlx::query("DELETE FROM leadflow.continuation WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
