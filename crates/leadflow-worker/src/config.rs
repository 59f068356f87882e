//! Worker configuration.

use std::time::Duration;

use anyhow::Result;
use leadflow_engine::config::AppConfig;
use leadflow_engine::engine::EngineConfig;
use leadflow_engine::services::GatewayConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identifier, also the owner written into run locks.
    pub worker_id: String,

    /// Interval between trigger gateway batches.
    pub gateway_poll_interval: Duration,

    /// Events claimed per gateway batch.
    pub gateway_batch_size: usize,

    /// Trigger partitions processed in parallel.
    pub gateway_concurrency: usize,

    /// Interval between continuation sweeps.
    pub continuation_poll_interval: Duration,

    /// Continuations claimed per sweep.
    pub continuation_batch_size: usize,

    /// Maximum continuations resumed concurrently.
    pub max_concurrent_tasks: usize,

    /// Ceiling on step executions per run.
    pub max_steps_per_run: i32,

    /// Lease length of run locks.
    pub run_lock_ttl: Duration,
}

fn default_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("leadflow-worker-{}-{}", host, uuid::Uuid::new_v4().simple())
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Engine and gateway tuning share the server's `LEADFLOW_` variables;
    /// `WORKER_ID` and `WORKER_MAX_CONCURRENT` are worker specific.
    pub fn from_env() -> Result<Self> {
        let app = AppConfig::from_env()?;
        Ok(Self::from_app_config(&app))
    }

    pub fn from_app_config(app: &AppConfig) -> Self {
        let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id());

        Self {
            worker_id,
            gateway_poll_interval: Duration::from_secs(app.gateway_poll_interval_secs.max(1)),
            gateway_batch_size: app.gateway_batch_size,
            gateway_concurrency: app.gateway_concurrency,
            continuation_poll_interval: Duration::from_secs(
                app.continuation_poll_interval_secs.max(1),
            ),
            continuation_batch_size: app.continuation_batch_size,
            max_concurrent_tasks: env_or("WORKER_MAX_CONCURRENT", 4),
            max_steps_per_run: app.max_steps_per_run,
            run_lock_ttl: Duration::from_secs(app.run_lock_ttl_secs),
        }
    }

    /// Runs started by the worker execute inline inside the gateway batch,
    /// so gateway concurrency bounds them.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_steps_per_run: self.max_steps_per_run,
            run_lock_ttl: self.run_lock_ttl,
            detached_runs: false,
            lock_owner: self.worker_id.clone(),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            batch_size: self.gateway_batch_size,
            concurrency: self.gateway_concurrency,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}
