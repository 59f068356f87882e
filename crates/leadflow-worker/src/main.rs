//! Leadflow Worker binary.
//!
//! Polls the trigger gateway and sweeps due continuations until shutdown.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadflow_engine::config::DatabaseConfig;
use leadflow_engine::db::{create_pool, migrate};
use leadflow_engine::store::PgRunStore;
use leadflow_worker::{Worker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,leadflow_worker=debug,leadflow_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Leadflow worker");

    let config = WorkerConfig::from_env()?;
    let db_config = DatabaseConfig::from_env()?;
    tracing::info!(
        worker_id = %config.worker_id,
        database = %db_config.redacted_url(),
        "Worker configuration loaded"
    );

    let pool = create_pool(&db_config).await?;
    migrate(&pool).await?;

    let worker = Worker::new(
        config,
        Arc::new(PgRunStore::new(pool)),
        leadflow_actions::create_default_registry(),
    );

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker error");
                return Err(e);
            }
        }
        _ = shutdown => {
            tracing::info!("Shutting down worker");
        }
    }

    tracing::info!("Worker stopped");
    Ok(())
}
