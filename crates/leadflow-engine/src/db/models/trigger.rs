//! Trigger and queued trigger event models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::engine::condition::ConditionClause;
use crate::engine::mapper::FieldMapping;

/// Source category of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TriggerType {
    DatabaseEvent,
    Webhook,
    Schedule,
    Manual,
    ApiEvent,
    FieldCondition,
    IntegrationEvent,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseEvent => "database_event",
            Self::Webhook => "webhook",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
            Self::ApiEvent => "api_event",
            Self::FieldCondition => "field_condition",
            Self::IntegrationEvent => "integration_event",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule that matches incoming events and starts a workflow run.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Trigger {
    /// Primary key.
    pub id: Uuid,

    /// Workflow started by this trigger.
    pub workflow_id: Uuid,

    /// Display name.
    pub name: String,

    /// Source category.
    pub trigger_type: TriggerType,

    /// Ordered clause list, implicitly ANDed (JSON array).
    pub conditions: serde_json::Value,

    /// `[{source, target, transform?}]` applied to the event payload (JSON array).
    pub field_mapping: serde_json::Value,

    /// Lower values are evaluated first when several triggers match one event.
    pub priority: i32,

    /// Inactive triggers ignore their events.
    pub is_active: bool,

    /// Minimum seconds between two firings; 0 disables the cooldown.
    pub cooldown_seconds: i64,

    /// When the trigger last fired.
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// Opaque producer metadata (JSON).
    pub metadata: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Create an active trigger without conditions or mappings.
    pub fn new(workflow_id: Uuid, name: &str, trigger_type: TriggerType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            name: name.to_string(),
            trigger_type,
            conditions: serde_json::json!([]),
            field_mapping: serde_json::json!([]),
            priority: 0,
            is_active: true,
            cooldown_seconds: 0,
            last_triggered_at: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse the stored condition list. `null` means no conditions.
    pub fn condition_clauses(&self) -> Result<Vec<ConditionClause>, serde_json::Error> {
        if self.conditions.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(self.conditions.clone())
    }

    /// Parse the stored field mapping list. `null` means no mappings.
    pub fn field_mappings(&self) -> Result<Vec<FieldMapping>, serde_json::Error> {
        if self.field_mapping.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(self.field_mapping.clone())
    }

    /// Time left before the trigger may fire again, measured at `at`.
    ///
    /// Returns `None` when the trigger may fire.
    pub fn cooldown_remaining(&self, at: DateTime<Utc>) -> Option<Duration> {
        if self.cooldown_seconds <= 0 {
            return None;
        }
        let last = self.last_triggered_at?;
        let ready_at = last + Duration::seconds(self.cooldown_seconds);
        if at < ready_at {
            Some(ready_at - at)
        } else {
            None
        }
    }
}

/// Processing status of a queued trigger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TriggerEventStatus {
    /// Queued, waiting for the gateway.
    Triggered,
    /// Started a workflow run.
    Processed,
    /// Processing raised an error.
    Failed,
    /// Rejected by policy (inactive, cooldown, conditions).
    Ignored,
}

impl TriggerEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
        }
    }

    /// Terminal events are immutable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Triggered)
    }
}

impl std::fmt::Display for TriggerEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event queued by a producer for a trigger.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Primary key.
    pub id: Uuid,

    /// Trigger the producer addressed.
    pub trigger_id: Uuid,

    /// Raw event payload (JSON).
    pub payload: serde_json::Value,

    /// Processing status.
    pub status: TriggerEventStatus,

    /// Human-readable reason for `failed` / `ignored`.
    pub failure_reason: Option<String>,

    /// End-to-end processing time.
    pub processing_time_ms: Option<i64>,

    /// Run started for this event.
    pub workflow_run_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TriggerEvent {
    /// Create a queued event.
    pub fn new(trigger_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            payload,
            status: TriggerEventStatus::Triggered,
            failure_reason: None,
            processing_time_ms: None,
            workflow_run_id: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Terminal state written back to a trigger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResolution {
    pub status: TriggerEventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub processing_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger_with_cooldown(seconds: i64) -> Trigger {
        let mut trigger = Trigger::new(Uuid::new_v4(), "New lead", TriggerType::DatabaseEvent);
        trigger.cooldown_seconds = seconds;
        trigger
    }

    #[test]
    fn test_cooldown_disabled() {
        let mut trigger = trigger_with_cooldown(0);
        trigger.last_triggered_at = Some(Utc::now());
        assert!(trigger.cooldown_remaining(Utc::now()).is_none());
    }

    #[test]
    fn test_cooldown_never_fired() {
        let trigger = trigger_with_cooldown(60);
        assert!(trigger.cooldown_remaining(Utc::now()).is_none());
    }

    #[test]
    fn test_cooldown_window() {
        let mut trigger = trigger_with_cooldown(60);
        let fired_at = Utc::now();
        trigger.last_triggered_at = Some(fired_at);

        let remaining = trigger
            .cooldown_remaining(fired_at + Duration::seconds(59))
            .unwrap();
        assert_eq!(remaining, Duration::seconds(1));
        assert!(trigger
            .cooldown_remaining(fired_at + Duration::seconds(60))
            .is_none());
        // Events dated before the last firing are still inside the window.
        assert!(trigger
            .cooldown_remaining(fired_at - Duration::seconds(5))
            .is_some());
    }

    #[test]
    fn test_parse_conditions_and_mappings() {
        let mut trigger = trigger_with_cooldown(0);
        trigger.conditions = serde_json::json!([
            {"field": "status", "operator": "equals", "value": "new"}
        ]);
        trigger.field_mapping = serde_json::json!([
            {"source": "email", "target": "lead.email", "transform": "lowercase"}
        ]);
        assert_eq!(trigger.condition_clauses().unwrap().len(), 1);
        assert_eq!(trigger.field_mappings().unwrap().len(), 1);

        trigger.conditions = serde_json::Value::Null;
        assert!(trigger.condition_clauses().unwrap().is_empty());
    }

    #[test]
    fn test_event_status_terminal() {
        assert!(!TriggerEventStatus::Triggered.is_terminal());
        assert!(TriggerEventStatus::Ignored.is_terminal());
        assert_eq!(TriggerEventStatus::Processed.to_string(), "processed");
    }
}
