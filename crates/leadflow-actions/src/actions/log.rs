//! Logging action.

use async_trait::async_trait;

use crate::error::ActionError;
use crate::registry::Action;

/// Writes the step input to the log and echoes it back.
///
/// Config: `{"action_type": "log", "message": "...", "level": "info" | "warn" | "debug"}`.
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn execute(
        &self,
        config: &serde_json::Value,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let message = config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("workflow log action");

        match config.get("level").and_then(|v| v.as_str()).unwrap_or("info") {
            "warn" => tracing::warn!(input = %input, "{}", message),
            "debug" => tracing::debug!(input = %input, "{}", message),
            _ => tracing::info!(input = %input, "{}", message),
        }

        Ok(serde_json::json!({
            "logged": true,
            "message": message,
        }))
    }
}
