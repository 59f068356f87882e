//! Workflow execution engine.
//!
//! - **Condition**: evaluates ANDed `{field, operator, value}` clauses
//! - **Mapper**: dot-path get/set, path mappings and value transforms
//! - **Graph**: explicit step graph with typed successor edges
//! - **Step**: per-step input, error-handling policy and delays
//! - **Scheduler**: deferred continuations for delays and retries
//! - **Executor**: drives runs through their graphs

pub mod condition;
pub mod executor;
pub mod graph;
pub mod mapper;
pub mod scheduler;
pub mod step;

pub use condition::{ConditionClause, ConditionEvaluator, Operator};
pub use executor::{EngineConfig, ExecutionEngine, ResumeOutcome, RunOrigin};
pub use graph::{Edge, StepGraph};
pub use mapper::{FieldMapping, Transform};
pub use scheduler::{Scheduler, StoreScheduler};
pub use step::{ErrorHandling, OnError, StepError};
