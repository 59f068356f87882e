//! Built-in action implementations.
//!
//! - `http_request` - Call an external HTTP endpoint
//! - `log` - Emit the step input through `tracing`
//!
//! Handlers whose side effects live in other systems (`send_email`,
//! `update_crm`, ...) are registered by the host application.

mod http;
mod log;

pub use self::http::{HttpMethod, HttpRequestAction, HttpRequestConfig};
pub use self::log::LogAction;

use crate::registry::ActionRegistry;

/// Create an action registry with all built-in actions registered.
pub fn create_default_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    registry.register(HttpRequestAction::new());
    registry.register(LogAction);

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let registry = create_default_registry();
        assert_eq!(registry.list(), vec!["http_request", "log"]);
    }
}
