//! Workflow run and step run models.
//!
//! Run states: `pending -> running -> {completed | failed | cancelled}`.
//! Step run states: `pending -> running -> {completed | failed | skipped | delayed}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Running) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// Status of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum StepRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Delayed,
}

impl StepRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Delayed => "delayed",
        }
    }
}

impl std::fmt::Display for StepRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution instance of a workflow.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Primary key.
    pub id: Uuid,

    /// Workflow being executed.
    pub workflow_id: Uuid,

    /// Trigger that started the run, if any.
    pub trigger_id: Option<Uuid>,

    /// Queued event that started the run, if any.
    pub trigger_event_id: Option<Uuid>,

    /// Run status.
    pub status: RunStatus,

    /// Immutable input snapshot (JSON).
    pub trigger_data: serde_json::Value,

    /// Cumulative step outputs keyed by `step_<uid>` (JSON object).
    pub context_data: serde_json::Value,

    /// Step the run is on, or last finished.
    pub current_step_id: Option<Uuid>,

    /// Step attempts executed so far, bounded per run.
    pub steps_executed: i32,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall time from start to terminal state.
    pub execution_time_ms: Option<i64>,

    pub error_message: Option<String>,

    /// `{step_id, step_uid, attempts, message}` for failed runs (JSON).
    pub error_details: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Create a pending run with an empty context.
    pub fn new(workflow_id: Uuid, trigger_data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            trigger_id: None,
            trigger_event_id: None,
            status: RunStatus::Pending,
            trigger_data,
            context_data: serde_json::json!({}),
            current_step_id: None,
            steps_executed: 0,
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            error_message: None,
            error_details: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a step output under `key` without disturbing other entries.
    pub fn merge_context(&mut self, key: &str, output: serde_json::Value) {
        if !self.context_data.is_object() {
            self.context_data = serde_json::json!({});
        }
        if let Some(map) = self.context_data.as_object_mut() {
            map.insert(key.to_string(), output);
        }
    }

    /// Elapsed milliseconds between `started_at` and `at`.
    pub fn elapsed_ms(&self, at: DateTime<Utc>) -> i64 {
        self.started_at
            .map(|started| (at - started).num_milliseconds().max(0))
            .unwrap_or(0)
    }
}

/// One execution attempt of one step within a run.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkflowStepRun {
    /// Primary key.
    pub id: Uuid,

    /// Owning run.
    pub run_id: Uuid,

    /// Step executed.
    pub step_id: Uuid,

    /// Step key at execution time.
    pub step_uid: String,

    /// Step type at execution time.
    pub step_type: String,

    /// Attempt status.
    pub status: StepRunStatus,

    /// Zero for the first attempt, incremented per retry.
    pub retry_count: i32,

    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// For `delayed` attempts: when the run continues.
    pub resume_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl WorkflowStepRun {
    /// Create a running attempt.
    pub fn start(
        run_id: Uuid,
        step_id: Uuid,
        step_uid: &str,
        step_type: &str,
        retry_count: i32,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_id,
            step_uid: step_uid.to_string(),
            step_type: step_type.to_string(),
            status: StepRunStatus::Running,
            retry_count,
            input_data: Some(input),
            output_data: None,
            error_message: None,
            error_details: None,
            started_at: Some(now),
            completed_at: None,
            resume_at: None,
            created_at: now,
        }
    }
}

/// Run plus its ordered attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub run: WorkflowRun,
    pub steps: Vec<WorkflowStepRun>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn test_run_status_from_str() {
        assert_eq!(RunStatus::from("RUNNING"), RunStatus::Running);
        assert_eq!(RunStatus::from("canceled"), RunStatus::Cancelled);
        assert_eq!(RunStatus::from("unknown"), RunStatus::Pending);
    }

    #[test]
    fn test_merge_context_preserves_existing_keys() {
        let mut run = WorkflowRun::new(Uuid::new_v4(), serde_json::json!({}));
        run.context_data = serde_json::json!({"zeta": 1, "alpha": 2});
        run.merge_context("step_notify", serde_json::json!({"sent": true}));

        let keys: Vec<&String> = run.context_data.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "step_notify"]);
    }

    #[test]
    fn test_elapsed_ms() {
        let mut run = WorkflowRun::new(Uuid::new_v4(), serde_json::json!({}));
        assert_eq!(run.elapsed_ms(Utc::now()), 0);

        let started = Utc::now();
        run.started_at = Some(started);
        assert_eq!(run.elapsed_ms(started + chrono::Duration::milliseconds(250)), 250);
    }
}
