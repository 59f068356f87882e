//! Application state for the Leadflow server.
//!
//! This module defines the shared application state that is
//! passed to all handlers via Axum's state management.

use std::sync::Arc;

use leadflow_actions::ActionRegistry;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::engine::{ExecutionEngine, StoreScheduler};
use crate::services::{MetricsAggregator, TriggerGateway};
use crate::store::RunStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, absent when running on an in-memory store
    pub db: Option<DbPool>,

    /// Run Store shared by every service
    pub store: Arc<dyn RunStore>,

    pub engine: Arc<ExecutionEngine>,

    pub gateway: TriggerGateway,

    pub metrics: MetricsAggregator,

    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the engine, gateway and metrics aggregator over `store`.
    pub fn new(
        store: Arc<dyn RunStore>,
        actions: ActionRegistry,
        config: AppConfig,
        db: Option<DbPool>,
    ) -> Self {
        let lock_owner = format!("{}-{}", config.server_name, uuid::Uuid::new_v4().simple());
        let scheduler = Arc::new(StoreScheduler::new(store.clone()));
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            Arc::new(actions),
            scheduler,
            config.engine_config(&lock_owner),
        ));
        let gateway = TriggerGateway::new(store.clone(), engine.clone(), config.gateway_config());

        Self {
            db,
            metrics: MetricsAggregator::new(store.clone()),
            store,
            engine,
            gateway,
            config: Arc::new(config),
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
