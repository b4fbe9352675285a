//! Metrics endpoints for monitoring.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use cmsvs_common::{AppResult, cache::CacheStats, metrics::PerformanceSummary};
use sea_orm::ConnectionTrait;
use serde::Serialize;

use crate::{extractors::AdminUser, middleware::AppState, response::ApiResponse};

/// Performance and cache snapshot.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub performance: PerformanceSummary,
    pub cache: CacheStats,
}

/// Get the performance summary. Admin only.
async fn get_metrics(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<MetricsResponse>> {
    Ok(ApiResponse::ok(MetricsResponse {
        performance: state.metrics.summary(),
        cache: state.cache.stats(),
    }))
}

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Simple health check (liveness probe).
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check (readiness probe), pings the database.
async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    match state
        .db
        .execute_unprepared("SELECT 1")
        .await
    {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_metrics))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}
