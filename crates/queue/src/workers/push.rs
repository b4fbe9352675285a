//! Push delivery worker.
//!
//! Delivers one notification to every active subscription of the recipient.
//! Dead endpoints (404/410 class) deactivate the subscription; transient
//! failures retry with exponential backoff up to three attempts. The
//! notification is marked sent once all subscriptions are processed,
//! whatever the delivery outcome, so the in-app surface stays consistent.

use apalis::prelude::*;
use cmsvs_common::Clock;
use cmsvs_core::PushJob;
use cmsvs_db::entities::push_subscription;
use cmsvs_db::repositories::{NotificationRepository, PushSubscriptionRepository};
use std::time::Duration;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder,
};

use crate::retry::RetryConfig;

/// Per-attempt delivery timeout.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Context for the push worker.
#[derive(Clone)]
pub struct PushWorkerContext {
    pub subscription_repo: PushSubscriptionRepository,
    pub notification_repo: NotificationRepository,
    pub clock: Clock,
    pub vapid_private_key: String,
    pub vapid_subject: String,
    pub retry: RetryConfig,
}

impl PushWorkerContext {
    /// Create a new push worker context.
    #[must_use]
    pub fn new(
        subscription_repo: PushSubscriptionRepository,
        notification_repo: NotificationRepository,
        clock: Clock,
        vapid_private_key: String,
        vapid_subject: String,
    ) -> Self {
        Self {
            subscription_repo,
            notification_repo,
            clock,
            vapid_private_key,
            vapid_subject,
            retry: RetryConfig::default(),
        }
    }
}

/// What to do with a subscription after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// The endpoint is gone; deactivate the subscription.
    Deactivate,
    /// Transient failure; another attempt may succeed.
    Retry,
    /// Permanent failure for this delivery; keep the subscription.
    Fail,
}

fn job_error(e: cmsvs_common::AppError) -> Error {
    let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
    Error::Failed(std::sync::Arc::new(boxed))
}

fn classify(error: &WebPushError) -> Disposition {
    match error {
        WebPushError::EndpointNotFound | WebPushError::EndpointNotValid => {
            Disposition::Deactivate
        }
        WebPushError::ServerError { .. } | WebPushError::IoError | WebPushError::Other(_) => {
            Disposition::Retry
        }
        _ => Disposition::Fail,
    }
}

/// The payload browsers receive, rendered by the service worker.
fn payload_for(job: &PushJob) -> serde_json::Value {
    serde_json::json!({
        "notification_id": job.notification_id,
        "title": job.title,
        "body": job.body,
        "url": job.action_url,
    })
}

/// Worker function for delivering one queued push notification.
///
/// # Errors
/// Returns an error only when the database is unreachable; delivery
/// failures are absorbed so the job is not redelivered endlessly.
pub async fn push_worker(job: PushJob, ctx: Data<PushWorkerContext>) -> Result<(), Error> {
    info!(
        notification_id = job.notification_id,
        user_id = job.user_id,
        "Delivering push notification"
    );

    let subscriptions = ctx
        .subscription_repo
        .find_active_by_user(job.user_id)
        .await
        .map_err(job_error)?;

    if subscriptions.is_empty() {
        debug!(
            notification_id = job.notification_id,
            "No active subscriptions, nothing to deliver"
        );
    }

    let payload = payload_for(&job);
    for subscription in subscriptions {
        deliver_to_subscription(&ctx, &payload, &subscription).await;
    }

    ctx.notification_repo
        .mark_sent(job.notification_id, ctx.clock.now().into())
        .await
        .map_err(job_error)?;

    Ok(())
}

/// Try one subscription with bounded retries. All outcomes are absorbed.
async fn deliver_to_subscription(
    ctx: &PushWorkerContext,
    payload: &serde_json::Value,
    subscription: &push_subscription::Model,
) {
    let mut attempt = 0;
    loop {
        let outcome = tokio::time::timeout(
            ATTEMPT_TIMEOUT,
            send_once(ctx, payload, subscription),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(subscription_id = subscription.id, "Push delivered");
                if let Err(e) = ctx
                    .subscription_repo
                    .touch(subscription.id, ctx.clock.now().into())
                    .await
                {
                    warn!(subscription_id = subscription.id, error = %e, "Failed to record delivery");
                }
                return;
            }
            Ok(Err(e)) => match classify(&e) {
                Disposition::Deactivate => {
                    warn!(
                        subscription_id = subscription.id,
                        error = %e,
                        "Endpoint gone, deactivating subscription"
                    );
                    if let Err(db) = ctx
                        .subscription_repo
                        .deactivate(subscription.id, ctx.clock.now().into())
                        .await
                    {
                        warn!(subscription_id = subscription.id, error = %db, "Failed to deactivate subscription");
                    }
                    return;
                }
                Disposition::Fail => {
                    warn!(subscription_id = subscription.id, error = %e, "Push delivery failed");
                    return;
                }
                Disposition::Retry => {
                    warn!(
                        subscription_id = subscription.id,
                        attempt,
                        error = %e,
                        "Push delivery failed, will retry"
                    );
                }
            },
            Err(_) => {
                warn!(
                    subscription_id = subscription.id,
                    attempt, "Push delivery timed out"
                );
            }
        }

        attempt += 1;
        if !ctx.retry.should_retry(attempt) {
            warn!(
                subscription_id = subscription.id,
                attempts = attempt,
                "Giving up on push delivery"
            );
            return;
        }
        tokio::time::sleep(ctx.retry.delay_for_attempt(attempt - 1)).await;
    }
}

async fn send_once(
    ctx: &PushWorkerContext,
    payload: &serde_json::Value,
    subscription: &push_subscription::Model,
) -> Result<(), WebPushError> {
    let info = SubscriptionInfo::new(
        subscription.endpoint.clone(),
        subscription.p256dh.clone(),
        subscription.auth.clone(),
    );

    let mut signature = VapidSignatureBuilder::from_base64(
        &ctx.vapid_private_key,
        web_push::URL_SAFE_NO_PAD,
        &info,
    )?;
    signature.add_claim("sub", ctx.vapid_subject.as_str());

    let body = payload.to_string();
    let mut builder = WebPushMessageBuilder::new(&info);
    builder.set_payload(ContentEncoding::Aes128Gcm, body.as_bytes());
    builder.set_vapid_signature(signature.build()?);

    let client = IsahcWebPushClient::new()?;
    client.send(builder.build()?).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_endpoints_deactivate() {
        assert_eq!(
            classify(&WebPushError::EndpointNotFound),
            Disposition::Deactivate
        );
        assert_eq!(
            classify(&WebPushError::EndpointNotValid),
            Disposition::Deactivate
        );
    }

    #[test]
    fn test_server_errors_retry() {
        assert_eq!(
            classify(&WebPushError::ServerError(None)),
            Disposition::Retry
        );
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert_eq!(classify(&WebPushError::InvalidUri), Disposition::Fail);
        assert_eq!(
            classify(&WebPushError::MissingCryptoKeys),
            Disposition::Fail
        );
    }

    #[test]
    fn test_payload_shape() {
        let job = PushJob {
            notification_id: 12,
            user_id: 7,
            title: "Request completed".into(),
            body: "REQ-20250614034524 was completed".into(),
            action_url: Some("/requests/12".into()),
        };
        let payload = payload_for(&job);
        assert_eq!(payload["notification_id"], 12);
        assert_eq!(payload["url"], "/requests/12");
        assert!(payload["title"].as_str().unwrap().contains("completed"));
    }
}
