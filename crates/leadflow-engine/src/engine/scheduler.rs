//! Deferred continuation scheduling.
//!
//! Delay steps and delayed retries never sleep. They hand a [`Continuation`]
//! to a [`Scheduler`], and a sweeper later feeds it back to
//! `ExecutionEngine::resume`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::Continuation;
use crate::error::AppResult;
use crate::store::RunStore;

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Arrange for `continuation` to be delivered at or after `due_at`.
    async fn schedule_at(&self, due_at: DateTime<Utc>, continuation: Continuation) -> AppResult<()>;
}

/// Durable scheduler backed by the Run Store.
#[derive(Clone)]
pub struct StoreScheduler {
    store: Arc<dyn RunStore>,
}

impl StoreScheduler {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Scheduler for StoreScheduler {
    async fn schedule_at(&self, due_at: DateTime<Utc>, mut continuation: Continuation) -> AppResult<()> {
        continuation.due_at = due_at;
        self.store.schedule_continuation(&continuation).await?;

        tracing::debug!(
            run_id = %continuation.run_id,
            kind = %continuation.kind,
            due_at = %due_at,
            "Continuation scheduled"
        );
        Ok(())
    }
}
