//! Leadflow Action Library
//!
//! Side-effect handlers invoked by workflow `action` steps. The engine only
//! knows the [`Action`] contract: a handler receives the step's `config` and
//! its (possibly reshaped) input and returns a JSON result.
//!
//! - [`registry`]: the `Action` trait and the `ActionRegistry` keyed by `action_type`
//! - [`actions`]: built-in handlers (`http_request`, `log`)
//! - [`error`]: `ActionError`

pub mod actions;
pub mod error;
pub mod registry;

pub use actions::create_default_registry;
pub use error::ActionError;
pub use registry::{Action, ActionRegistry};
