//! Per-step building blocks: errors, error-handling policy, input and delays.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::db::models::{WorkflowRun, WorkflowStep, WorkflowStepRun};

use super::mapper;

/// Failure of a single step attempt.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// Broken step definition. Fatal to the run and never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The step ran and failed.
    #[error("{message}")]
    Execution { message: String, retryable: bool },
}

impl StepError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { retryable: true, .. })
    }
}

/// What to do once a step has exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OnError {
    /// Proceed to `next_step_id`. Not honoured by condition steps.
    Continue,
    /// Mark the run failed.
    #[default]
    FailWorkflow,
}

impl From<String> for OnError {
    fn from(s: String) -> Self {
        match s.as_str() {
            "continue" => Self::Continue,
            _ => Self::FailWorkflow,
        }
    }
}

impl From<OnError> for String {
    fn from(policy: OnError) -> Self {
        match policy {
            OnError::Continue => "continue".to_string(),
            OnError::FailWorkflow => "fail_workflow".to_string(),
        }
    }
}

/// Step `error_handling` document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorHandling {
    /// Retries after the first attempt (default: 0).
    #[serde(default)]
    pub max_retries: i32,

    /// Fixed delay between attempts (default: 0, retry immediately).
    #[serde(default)]
    pub retry_delay_seconds: i64,

    /// Policy once retries are exhausted (default: `fail_workflow`).
    #[serde(default)]
    pub on_error: OnError,
}

impl ErrorHandling {
    /// Parse a step's policy; a missing document yields the defaults.
    pub fn for_step(step: &WorkflowStep) -> Result<Self, StepError> {
        match &step.error_handling {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                StepError::Configuration(format!(
                    "invalid error_handling on step {}: {}",
                    step.uid, e
                ))
            }),
        }
    }

    /// Whether attempt number `attempt` (0-based) may be followed by another.
    pub fn allows_retry(&self, attempt: i32) -> bool {
        attempt < self.max_retries.max(0)
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        (self.retry_delay_seconds > 0).then(|| Duration::seconds(self.retry_delay_seconds))
    }
}

/// Step input: `{trigger_data, context, previous_step?}`.
pub fn build_input(run: &WorkflowRun, previous: Option<&WorkflowStepRun>) -> Value {
    let mut input = json!({
        "trigger_data": run.trigger_data,
        "context": run.context_data,
    });
    if let (Some(previous), Some(map)) = (previous, input.as_object_mut()) {
        map.insert(
            "previous_step".to_string(),
            json!({
                "output": previous.output_data.clone().unwrap_or(Value::Null),
                "status": previous.status,
            }),
        );
    }
    input
}

/// Reshape the input through the step's own `field_mapping`, if any.
pub fn apply_step_mapping(step: &WorkflowStep, input: Value) -> Result<Value, StepError> {
    match &step.field_mapping {
        None | Some(Value::Null) => Ok(input),
        Some(Value::Object(mapping)) if mapping.is_empty() => Ok(input),
        Some(Value::Object(mapping)) => Ok(mapper::apply_mapping(&input, mapping)),
        Some(_) => Err(StepError::Configuration(format!(
            "field_mapping on step {} must be an object",
            step.uid
        ))),
    }
}

/// `config.delay` of a delay step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DelaySpec {
    pub amount: i64,
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_unit() -> String {
    "minutes".to_string()
}

impl DelaySpec {
    pub fn from_config(step: &WorkflowStep) -> Result<Self, StepError> {
        let delay = step.config.get("delay").ok_or_else(|| {
            StepError::Configuration(format!("delay step {} has no config.delay", step.uid))
        })?;
        serde_json::from_value(delay.clone()).map_err(|e| {
            StepError::Configuration(format!("invalid delay on step {}: {}", step.uid, e))
        })
    }

    pub fn duration(&self) -> Result<Duration, StepError> {
        let amount = self.amount.max(0);
        let duration = match self.unit.to_lowercase().trim_end_matches('s') {
            "second" => Duration::try_seconds(amount),
            "minute" => Duration::try_minutes(amount),
            "hour" => Duration::try_hours(amount),
            "day" => Duration::try_days(amount),
            "week" => Duration::try_weeks(amount),
            _ => {
                return Err(StepError::Configuration(format!(
                    "unknown delay unit: {}",
                    self.unit
                )))
            }
        };
        duration.ok_or_else(|| StepError::Configuration(format!("delay amount out of range: {}", amount)))
    }

    /// Resume time and the output recorded on the delayed step run.
    pub fn resume_at(&self, from: DateTime<Utc>) -> Result<(DateTime<Utc>, Value), StepError> {
        let resume_at = from + self.duration()?;
        let output = json!({
            "resume_at": resume_at,
            "amount": self.amount,
            "unit": self.unit,
        });
        Ok((resume_at, output))
    }
}
