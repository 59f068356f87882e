//! Service layer.
//!
//! Services coordinate the store, the execution engine and the metrics
//! aggregator on behalf of handlers and the worker.

pub mod gateway;
pub mod metrics;

pub use gateway::{BatchReport, GatewayConfig, TriggerGateway, TriggerTestResult};
pub use metrics::MetricsAggregator;
