//! API endpoints.

mod admin;
mod auth;
mod metrics;
mod notifications;
mod requests;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/requests", requests::router())
        .nest("/notifications", notifications::router())
        .nest("/admin", admin::router())
        .nest("/metrics", metrics::router())
}
