//! Worker lifecycle management.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use leadflow_actions::ActionRegistry;
use leadflow_engine::db::models::Continuation;
use leadflow_engine::engine::{ExecutionEngine, ResumeOutcome, StoreScheduler};
use leadflow_engine::services::{BatchReport, TriggerGateway};
use leadflow_engine::store::RunStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::WorkerConfig;

/// Seconds before a continuation whose resume errored is offered again.
const RESUME_ERROR_BACKOFF_SECS: i64 = 5;

/// Counts for one continuation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub resumed: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Periodic batch job: drains queued trigger events through the gateway and
/// re-enters runs whose delays or retry backoffs have elapsed.
pub struct Worker {
    /// Worker configuration.
    config: WorkerConfig,

    store: Arc<dyn RunStore>,

    engine: Arc<ExecutionEngine>,

    gateway: TriggerGateway,

    /// Bounds concurrent resumes.
    semaphore: Arc<Semaphore>,
}

impl Worker {
    /// Create a worker over `store`.
    pub fn new(config: WorkerConfig, store: Arc<dyn RunStore>, actions: ActionRegistry) -> Self {
        let scheduler = Arc::new(StoreScheduler::new(store.clone()));
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            Arc::new(actions),
            scheduler,
            config.engine_config(),
        ));
        let gateway = TriggerGateway::new(store.clone(), engine.clone(), config.gateway_config());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));

        Self {
            config,
            store,
            engine,
            gateway,
            semaphore,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn gateway(&self) -> &TriggerGateway {
        &self.gateway
    }

    /// Run both loops until the future is dropped.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            worker_id = %self.config.worker_id,
            gateway_poll_secs = self.config.gateway_poll_interval.as_secs(),
            continuation_poll_secs = self.config.continuation_poll_interval.as_secs(),
            "Worker started"
        );

        let mut gateway_ticker = tokio::time::interval(self.config.gateway_poll_interval);
        let mut continuation_ticker = tokio::time::interval(self.config.continuation_poll_interval);
        gateway_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        continuation_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = gateway_ticker.tick() => {
                    if let Err(e) = self.run_gateway_once().await {
                        tracing::error!(error = %e, "Trigger gateway batch failed");
                    }
                }
                _ = continuation_ticker.tick() => {
                    if let Err(e) = self.sweep_continuations_once().await {
                        tracing::error!(error = %e, "Continuation sweep failed");
                    }
                }
            }
        }
    }

    /// Process one batch of queued trigger events.
    pub async fn run_gateway_once(&self) -> Result<BatchReport> {
        let report = self
            .gateway
            .process_pending(self.config.gateway_batch_size)
            .await?;
        if report.claimed > 0 {
            tracing::debug!(
                claimed = report.claimed,
                processed = report.processed,
                ignored = report.ignored,
                failed = report.failed,
                "Trigger gateway batch finished"
            );
        }
        Ok(report)
    }

    /// Resume every continuation that is due, at most
    /// `max_concurrent_tasks` at a time.
    ///
    /// A continuation is acknowledged only once its resume returns, so one
    /// claimed by a worker that dies mid-resume is delivered again when its
    /// claim lease runs out.
    pub async fn sweep_continuations_once(&self) -> Result<SweepReport> {
        let due = self
            .store
            .claim_due_continuations(Utc::now(), self.config.continuation_batch_size)
            .await?;

        let mut report = SweepReport {
            claimed: due.len(),
            ..SweepReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for continuation in due {
            let permit = self.semaphore.clone().acquire_owned().await?;
            let engine = self.engine.clone();
            let store = self.store.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = engine.resume(&continuation).await;
                match &outcome {
                    Ok(ResumeOutcome::Resumed | ResumeOutcome::Skipped) => {
                        acknowledge(store.as_ref(), &continuation).await;
                    }
                    // Already rescheduled by the engine.
                    Ok(ResumeOutcome::Deferred) => {}
                    Err(e) => {
                        tracing::error!(
                            run_id = %continuation.run_id,
                            continuation_id = %continuation.id,
                            error = %e,
                            "Resume failed, rescheduling continuation"
                        );
                        reschedule(store.as_ref(), &continuation).await;
                    }
                }
                outcome.ok()
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(ResumeOutcome::Resumed)) => report.resumed += 1,
                Ok(Some(ResumeOutcome::Deferred)) => report.deferred += 1,
                Ok(Some(ResumeOutcome::Skipped)) => report.skipped += 1,
                Ok(None) => report.errors += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Resume task panicked");
                    report.errors += 1;
                }
            }
        }

        tracing::debug!(
            claimed = report.claimed,
            resumed = report.resumed,
            deferred = report.deferred,
            skipped = report.skipped,
            errors = report.errors,
            "Continuation sweep finished"
        );
        Ok(report)
    }
}

async fn acknowledge(store: &dyn RunStore, continuation: &Continuation) {
    if let Err(e) = store.complete_continuation(continuation.id).await {
        tracing::warn!(
            run_id = %continuation.run_id,
            continuation_id = %continuation.id,
            error = %e,
            "Continuation not acknowledged, it will be delivered again"
        );
    }
}

async fn reschedule(store: &dyn RunStore, continuation: &Continuation) {
    let due_at = Utc::now() + chrono::Duration::seconds(RESUME_ERROR_BACKOFF_SECS);
    if let Err(e) = store
        .schedule_continuation(&continuation.deferred(due_at))
        .await
    {
        tracing::error!(
            run_id = %continuation.run_id,
            error = %e,
            "Continuation not rescheduled, it returns when its claim expires"
        );
    }
}
