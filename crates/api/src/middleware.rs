//! API middleware and application state.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use cmsvs_common::{CacheManager, Clock, PerformanceMetrics};
use cmsvs_core::{AttachmentService, NotificationEngine, RequestService};
use cmsvs_db::repositories::{
    NotificationPreferenceRepository, PushSubscriptionRepository, UserRepository,
};
use sea_orm::DatabaseConnection;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub clock: Clock,
    pub request_service: RequestService,
    pub attachment_service: AttachmentService,
    pub notification_engine: NotificationEngine,
    pub preference_repo: NotificationPreferenceRepository,
    pub subscription_repo: PushSubscriptionRepository,
    pub user_repo: UserRepository,
    pub cache: Arc<CacheManager>,
    pub metrics: Arc<PerformanceMetrics>,
}

/// Cache key prefix for session tokens.
pub const SESSION_PREFIX: &str = "session:";

/// Session lifetime.
pub const SESSION_TTL: std::time::Duration = std::time::Duration::from_secs(8 * 60 * 60);

/// Authentication middleware.
///
/// Resolves a `Bearer` session token into a user and places the model in
/// request extensions for the `AuthUser`/`AdminUser` extractors. Requests
/// without a valid token pass through unauthenticated.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(auth_header) = req.headers().get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
        && let Some(user) = resolve_session(&state, token).await
    {
        req.extensions_mut().insert(user);
    }

    next.run(req).await
}

async fn resolve_session(state: &AppState, token: &str) -> Option<cmsvs_db::entities::user::Model> {
    let key = format!("{SESSION_PREFIX}{token}");
    let user_id = match state.cache.get(&key).await {
        Ok(Some(value)) => value.as_i64()?,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "Session lookup failed");
            return None;
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    match state.user_repo.find_by_id(user_id as i32).await {
        Ok(Some(user)) if user.is_active => Some(user),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "User lookup failed during authentication");
            None
        }
    }
}

/// Records every request into the performance window.
pub async fn performance_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    state
        .metrics
        .record_request(method.as_str(), &path, start.elapsed());
    response
}
