//! Leadflow Engine Library
//!
//! Trigger-driven workflow automation:
//!
//! - **Trigger Gateway**: claims queued events, applies activity, cooldown
//!   and condition checks, maps payloads and starts runs
//! - **Execution Engine**: walks a workflow's step graph with retries,
//!   branches, delays, cancellation and a per-run step ceiling
//! - **Run Store**: persistence seam with in-memory and PostgreSQL backends
//! - **Metrics Aggregator**: per-day trigger counters and workflow rolling counters
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Database connectivity, models and queries
//! - [`engine`]: Condition evaluation, field mapping and traversal
//! - [`error`]: Custom error types with Axum integration
//! - [`handlers`]: HTTP route handlers
//! - [`services`]: Trigger gateway and metrics
//! - [`state`]: Shared application state
//! - [`store`]: The `RunStore` trait and its implementations
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use leadflow_engine::{config::AppConfig, state::AppState, store::MemoryStore};
//!
//! let state = AppState::new(
//!     Arc::new(MemoryStore::new()),
//!     leadflow_actions::create_default_registry(),
//!     AppConfig::default(),
//!     None,
//! );
//! let app = leadflow_engine::handlers::router(state);
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod result_ext;
pub mod services;
pub mod state;
pub mod store;

pub use error::{AppError, AppResult};
pub use result_ext::{OptionResultExt, ResultExt};
