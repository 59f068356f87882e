//! Workflow and workflow step models.
//!
//! A workflow owns an ordered step graph. Steps reference their successors
//! by id; the engine builds an explicit graph from them before traversal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Being authored, never executed.
    Draft,
    /// Accepting runs.
    Active,
    /// Paused by its owner.
    Inactive,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for WorkflowStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            _ => Self::Draft,
        }
    }
}

/// Workflow definition record with rolling run counters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Workflow {
    /// Primary key.
    pub id: Uuid,

    /// Owning user.
    pub owner_id: Option<Uuid>,

    /// Display name.
    pub name: String,

    /// Free-form description.
    pub description: Option<String>,

    /// Lifecycle status.
    pub status: WorkflowStatus,

    /// Definition version, bumped by authoring tools.
    pub version: i32,

    /// Opaque authoring metadata (JSON).
    pub metadata: Option<serde_json::Value>,

    /// Number of finished runs (completed or failed).
    pub total_runs: i64,

    /// Number of completed runs.
    pub success_runs: i64,

    /// Number of failed runs.
    pub failed_runs: i64,

    /// `success_runs / total_runs` as a percentage.
    pub success_rate: f64,

    /// Running mean of run wall time.
    pub avg_execution_time_ms: f64,

    /// When the last run finished.
    pub last_run_at: Option<DateTime<Utc>>,

    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a new draft workflow with zeroed counters.
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            name: name.to_string(),
            description: None,
            status: WorkflowStatus::Draft,
            version: 1,
            metadata: None,
            total_runs: 0,
            success_runs: 0,
            failed_runs: 0,
            success_rate: 0.0,
            avg_execution_time_ms: 0.0,
            last_run_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether new runs may be started for this workflow.
    pub fn is_executable(&self) -> bool {
        self.status == WorkflowStatus::Active && self.deleted_at.is_none()
    }

    /// Fold one finished run into the rolling counters.
    pub fn record_run(&mut self, succeeded: bool, execution_time_ms: i64, at: DateTime<Utc>) {
        self.total_runs += 1;
        if succeeded {
            self.success_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        self.success_rate = self.success_runs as f64 / self.total_runs as f64 * 100.0;
        self.avg_execution_time_ms = super::metric::incremental_mean(
            self.avg_execution_time_ms,
            self.total_runs,
            execution_time_ms as f64,
        );
        self.last_run_at = Some(at);
        self.updated_at = at;
    }
}

/// Kind of node in a step graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Invoke a registered side-effect handler.
    Action,
    /// Evaluate clauses and branch.
    Condition,
    /// Suspend the run until a resume time.
    Delay,
    /// Reshape data without external effects.
    DataMapper,
}

impl StepType {
    /// Parse a stored step type. Unknown names yield `None` so that the
    /// engine can report them as configuration errors at dispatch time.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "action" => Some(Self::Action),
            "condition" => Some(Self::Condition),
            "delay" => Some(Self::Delay),
            "data_mapper" => Some(Self::DataMapper),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Delay => "delay",
            Self::DataMapper => "data_mapper",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of a workflow's step graph.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Primary key; successor pointers reference it.
    pub id: Uuid,

    /// Owning workflow.
    pub workflow_id: Uuid,

    /// Stable author-facing key, used for `step_<uid>` context entries.
    pub uid: String,

    /// Display name.
    pub name: String,

    /// Stored step type. Kept as text so unknown values survive loading.
    pub step_type: String,

    /// Ordering hint; position 0 is the explicit entry step.
    pub position: i32,

    /// Type-specific configuration (JSON).
    pub config: serde_json::Value,

    /// Successor for non-branching steps.
    pub next_step_id: Option<Uuid>,

    /// Successor when a condition step evaluates to true.
    pub true_branch_step_id: Option<Uuid>,

    /// Successor when a condition step evaluates to false.
    pub false_branch_step_id: Option<Uuid>,

    /// `{max_retries, retry_delay_seconds, on_error}` (JSON).
    pub error_handling: Option<serde_json::Value>,

    /// `{target_path: source_path}` applied to the step input (JSON).
    pub field_mapping: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// Create a step with the given key, type and config.
    pub fn new(workflow_id: Uuid, uid: &str, step_type: &str, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            uid: uid.to_string(),
            name: uid.to_string(),
            step_type: step_type.to_string(),
            position: 0,
            config,
            next_step_id: None,
            true_branch_step_id: None,
            false_branch_step_id: None,
            error_handling: None,
            field_mapping: None,
            created_at: Utc::now(),
        }
    }

    /// Parsed step type, if known.
    pub fn kind(&self) -> Option<StepType> {
        StepType::parse(&self.step_type)
    }

    /// Key under which this step's output is merged into the run context.
    pub fn context_key(&self) -> String {
        format!("step_{}", self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_status_round_trip() {
        assert_eq!(WorkflowStatus::Active.to_string(), "active");
        assert_eq!(WorkflowStatus::from("INACTIVE"), WorkflowStatus::Inactive);
        assert_eq!(WorkflowStatus::from("bogus"), WorkflowStatus::Draft);
    }

    #[test]
    fn test_workflow_executable() {
        let mut workflow = Workflow::new("Welcome sequence");
        assert!(!workflow.is_executable());

        workflow.status = WorkflowStatus::Active;
        assert!(workflow.is_executable());

        workflow.deleted_at = Some(Utc::now());
        assert!(!workflow.is_executable());
    }

    #[test]
    fn test_record_run_counters() {
        let mut workflow = Workflow::new("Welcome sequence");
        let at = Utc::now();
        workflow.record_run(true, 100, at);
        workflow.record_run(true, 200, at);
        workflow.record_run(false, 300, at);

        assert_eq!(workflow.total_runs, 3);
        assert_eq!(workflow.success_runs, 2);
        assert_eq!(workflow.failed_runs, 1);
        assert!((workflow.success_rate - 66.666).abs() < 0.01);
        assert_eq!(workflow.avg_execution_time_ms, 200.0);
        assert_eq!(workflow.last_run_at, Some(at));
    }

    #[test]
    fn test_step_type_parse() {
        assert_eq!(StepType::parse("data_mapper"), Some(StepType::DataMapper));
        assert_eq!(StepType::parse("webhook"), None);
    }

    #[test]
    fn test_step_context_key() {
        let step = WorkflowStep::new(Uuid::new_v4(), "send_welcome", "action", serde_json::json!({}));
        assert_eq!(step.context_key(), "step_send_welcome");
        assert_eq!(step.kind(), Some(StepType::Action));
    }
}
