//! Action registry and dispatch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ActionError;

/// A side-effecting handler plugged in behind an `action_type` key.
///
/// Handlers may be invoked more than once for the same step when the step
/// is configured with retries. A handler that cannot tolerate that must
/// return `false` from [`Action::retryable`]; the engine then resolves the
/// first failure through the step's `on_error` policy directly.
#[async_trait]
pub trait Action: Send + Sync {
    /// Returns the action's `action_type` key.
    fn name(&self) -> &'static str;

    /// Whether the handler is safe to re-run after a failure.
    fn retryable(&self) -> bool {
        true
    }

    /// Execute the action with the step config and the step input.
    async fn execute(
        &self,
        config: &serde_json::Value,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ActionError>;
}

/// Registry of available actions.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create a new empty action registry.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action under its own name.
    pub fn register<A: Action + 'static>(&mut self, action: A) {
        let name = action.name().to_string();
        self.actions.insert(name, Arc::new(action));
    }

    /// Register an already shared action under an explicit key.
    pub fn register_as(&mut self, action_type: &str, action: Arc<dyn Action>) {
        self.actions.insert(action_type.to_string(), action);
    }

    /// Get an action by `action_type`.
    pub fn get(&self, action_type: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(action_type).cloned()
    }

    /// Check if an action is registered.
    pub fn has(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    /// List all registered action types.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Execute an action by `action_type`.
    pub async fn execute(
        &self,
        action_type: &str,
        config: &serde_json::Value,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let action = self
            .get(action_type)
            .ok_or_else(|| ActionError::NotFound(action_type.to_string()))?;
        action.execute(config, input).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.list())
            .finish()
    }
}
