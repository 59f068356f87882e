//! Deferred units of work that re-enter the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why the engine must be re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ContinuationKind {
    /// A delay step elapsed; continue after `step_id`.
    Resume,
    /// Re-run `step_id` as attempt `attempt`.
    Retry,
}

impl std::fmt::Display for ContinuationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resume => f.write_str("resume"),
            Self::Retry => f.write_str("retry"),
        }
    }
}

/// Scheduled re-entry into a run.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Continuation {
    pub id: Uuid,
    pub run_id: Uuid,
    pub kind: ContinuationKind,

    /// Delay step (resume) or step to re-run (retry).
    pub step_id: Uuid,

    /// Retry count of the attempt to run; 0 for resumes.
    pub attempt: i32,

    /// Step run whose output feeds the next step input.
    pub previous_step_run_id: Option<Uuid>,

    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Continuation {
    /// Continue after a delay step.
    pub fn resume(run_id: Uuid, step_id: Uuid, delayed_step_run_id: Uuid, due_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            kind: ContinuationKind::Resume,
            step_id,
            attempt: 0,
            previous_step_run_id: Some(delayed_step_run_id),
            due_at,
            created_at: Utc::now(),
        }
    }

    /// Retry a failed step.
    pub fn retry(
        run_id: Uuid,
        step_id: Uuid,
        attempt: i32,
        previous_step_run_id: Option<Uuid>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            kind: ContinuationKind::Retry,
            step_id,
            attempt,
            previous_step_run_id,
            due_at,
            created_at: Utc::now(),
        }
    }

    /// Same continuation, pushed back to `due_at`. Scheduling it replaces the
    /// stored row and releases any claim on it.
    pub fn deferred(&self, due_at: DateTime<Utc>) -> Self {
        Self {
            due_at,
            ..self.clone()
        }
    }
}
