//! Push delivery seam.
//!
//! The notification engine hands push-eligible notifications to a
//! [`PushDispatch`] implementation after the owning transaction commits.
//! The queue crate provides the Redis-backed implementation; tests use
//! in-memory fakes.

use async_trait::async_trait;
use cmsvs_common::AppResult;
use serde::{Deserialize, Serialize};

/// One queued push delivery, covering every active subscription of the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushJob {
    /// The persisted notification to deliver.
    pub notification_id: i32,
    /// Recipient whose subscriptions are fanned out to.
    pub user_id: i32,
    /// Notification title, duplicated so the worker avoids a re-read.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Optional click-through URL.
    pub action_url: Option<String>,
}

/// Enqueues push deliveries for later processing.
#[async_trait]
pub trait PushDispatch: Send + Sync {
    /// Queue one delivery. Fire-and-forget from the caller's view.
    async fn enqueue(&self, job: PushJob) -> AppResult<()>;
}
