//! Redis-backed push dispatch implementation.
//!
//! Implements the [`PushDispatch`] seam of the notification engine by
//! queueing jobs for the apalis worker to process.

use async_trait::async_trait;
use cmsvs_common::{AppError, AppResult};
use cmsvs_core::{PushDispatch, PushJob};

/// Queues push delivery jobs on Redis for the apalis worker.
#[derive(Clone)]
pub struct RedisPushDispatcher {
    storage: apalis_redis::RedisStorage<PushJob>,
}

impl RedisPushDispatcher {
    /// Create a new dispatcher over an apalis Redis storage.
    #[must_use]
    pub const fn new(storage: apalis_redis::RedisStorage<PushJob>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PushDispatch for RedisPushDispatcher {
    async fn enqueue(&self, job: PushJob) -> AppResult<()> {
        use apalis::prelude::*;

        let notification_id = job.notification_id;
        self.storage
            .clone()
            .push(job)
            .await
            .map_err(|e| AppError::Queue(format!("failed to queue push job: {e}")))?;

        tracing::debug!(notification_id, "Queued push delivery job");
        Ok(())
    }
}
