//! Background push delivery for cmsvs-rs.
//!
//! This crate provides the delivery half of the notification engine:
//!
//! - **Dispatch**: Redis-backed [`RedisPushDispatcher`] queueing
//!   [`PushJob`]s with Apalis
//! - **Worker**: web-push delivery against every active subscription of
//!   the recipient, with bounded retries
//! - **Retry**: Exponential backoff policy shared by the worker

pub mod dispatch;
pub mod retry;
pub mod workers;

pub use cmsvs_core::PushJob;
pub use dispatch::RedisPushDispatcher;
pub use retry::RetryConfig;
pub use workers::{PushWorkerContext, push_worker};
