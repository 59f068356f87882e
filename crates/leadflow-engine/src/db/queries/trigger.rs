//! Trigger and trigger event queries.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{EventResolution, Trigger, TriggerEvent};
use crate::db::DbPool;
use crate::error::AppResult;

/// Seconds before a claimed but unresolved event may be claimed again.
pub const EVENT_CLAIM_LEASE_SECS: i64 = 300;

/// Get a trigger by id.
pub async fn get_trigger(pool: &DbPool, id: Uuid) -> AppResult<Option<Trigger>> {
    let trigger = sqlx::query_as::<_, Trigger>(
        r#"
        SELECT id, workflow_id, name, trigger_type, conditions, field_mapping, priority,
               is_active, cooldown_seconds, last_triggered_at, metadata, created_at, updated_at
        FROM leadflow.trigger
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(trigger)
}

/// Insert or update a trigger.
pub async fn upsert_trigger(pool: &DbPool, trigger: &Trigger) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leadflow.trigger (
            id, workflow_id, name, trigger_type, conditions, field_mapping, priority,
            is_active, cooldown_seconds, last_triggered_at, metadata, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            workflow_id = EXCLUDED.workflow_id,
            name = EXCLUDED.name,
            trigger_type = EXCLUDED.trigger_type,
            conditions = EXCLUDED.conditions,
            field_mapping = EXCLUDED.field_mapping,
            priority = EXCLUDED.priority,
            is_active = EXCLUDED.is_active,
            cooldown_seconds = EXCLUDED.cooldown_seconds,
            last_triggered_at = EXCLUDED.last_triggered_at,
            metadata = EXCLUDED.metadata,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(trigger.id)
    .bind(trigger.workflow_id)
    .bind(&trigger.name)
    .bind(trigger.trigger_type)
    .bind(&trigger.conditions)
    .bind(&trigger.field_mapping)
    .bind(trigger.priority)
    .bind(trigger.is_active)
    .bind(trigger.cooldown_seconds)
    .bind(trigger.last_triggered_at)
    .bind(&trigger.metadata)
    .bind(trigger.created_at)
    .bind(trigger.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a firing at `at` unless the cooldown window, judged against the
/// event's `created_at`, is still open. Returns `false` if nothing changed.
pub async fn claim_firing(
    pool: &DbPool,
    id: Uuid,
    event_created_at: DateTime<Utc>,
    at: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE leadflow.trigger
        SET last_triggered_at = $3, updated_at = $3
        WHERE id = $1
          AND (
              cooldown_seconds <= 0
              OR last_triggered_at IS NULL
              OR last_triggered_at + make_interval(secs => cooldown_seconds::double precision) <= $2
          )
        "#,
    )
    .bind(id)
    .bind(event_created_at)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Queue a new trigger event.
pub async fn insert_event(pool: &DbPool, event: &TriggerEvent) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leadflow.trigger_event (
            id, trigger_id, payload, status, failure_reason, processing_time_ms,
            workflow_run_id, created_at, processed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(event.id)
    .bind(event.trigger_id)
    .bind(&event.payload)
    .bind(event.status)
    .bind(&event.failure_reason)
    .bind(event.processing_time_ms)
    .bind(event.workflow_run_id)
    .bind(event.created_at)
    .bind(event.processed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim up to `limit` pending events, oldest first.
///
/// Rows locked by a concurrent claimer are skipped, and a claim is a lease:
/// events whose claim is older than [`EVENT_CLAIM_LEASE_SECS`] are eligible
/// again.
pub async fn claim_pending_events(pool: &DbPool, limit: i64) -> AppResult<Vec<TriggerEvent>> {
    let events = sqlx::query_as::<_, TriggerEvent>(
        r#"
        WITH claimed AS (
            UPDATE leadflow.trigger_event
            SET claimed_at = now()
            WHERE id IN (
                SELECT id
                FROM leadflow.trigger_event
                WHERE status = 'triggered'
                  AND (claimed_at IS NULL OR claimed_at < now() - make_interval(secs => $2))
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, trigger_id, payload, status, failure_reason, processing_time_ms,
                      workflow_run_id, created_at, processed_at
        )
        SELECT * FROM claimed
        ORDER BY created_at
        "#,
    )
    .bind(limit)
    .bind(EVENT_CLAIM_LEASE_SECS as f64)
    .fetch_all(pool)
    .await?;

    Ok(events)
}

/// Get a trigger event by id.
pub async fn get_event(pool: &DbPool, id: Uuid) -> AppResult<Option<TriggerEvent>> {
    let event = sqlx::query_as::<_, TriggerEvent>(
        r#"
        SELECT id, trigger_id, payload, status, failure_reason, processing_time_ms,
               workflow_run_id, created_at, processed_at
        FROM leadflow.trigger_event
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(event)
}

/// Move a pending event to its terminal status.
///
/// Returns `false` if the event is missing or already resolved.
pub async fn resolve_event(
    pool: &DbPool,
    id: Uuid,
    resolution: &EventResolution,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE leadflow.trigger_event
        SET status = $2,
            failure_reason = $3,
            processing_time_ms = $4,
            workflow_run_id = $5,
            processed_at = $6
        WHERE id = $1 AND status = 'triggered'
        "#,
    )
    .bind(id)
    .bind(resolution.status)
    .bind(&resolution.failure_reason)
    .bind(resolution.processing_time_ms)
    .bind(resolution.workflow_run_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
