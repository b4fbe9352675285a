//! Admin endpoints.

use axum::{Json, Router, extract::State, routing::post};
use cmsvs_common::{AppError, AppResult};
use sea_orm::{TransactionError, TransactionTrait};
use serde::{Deserialize, Serialize};

use crate::{extractors::AdminUser, middleware::AppState, response::ApiResponse};

/// Admin message payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessageRequest {
    pub user_ids: Vec<i32>,
    pub title: String,
    pub body: String,
}

/// Delivery response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    /// Recipients that passed their preference gates and got a record.
    pub queued_push_count: usize,
}

fn flatten_txn(e: TransactionError<AppError>) -> AppError {
    match e {
        TransactionError::Connection(db) => db.into(),
        TransactionError::Transaction(app) => app,
    }
}

/// Send a high-priority admin message to the listed users.
async fn send_admin_message(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(req): Json<AdminMessageRequest>,
) -> AppResult<ApiResponse<DeliveryResponse>> {
    if req.user_ids.is_empty() {
        return Err(AppError::validation("userIds", "at least one recipient"));
    }

    let engine = state.notification_engine.clone();
    let pending = state
        .db
        .transaction(move |txn| {
            Box::pin(async move {
                engine
                    .send_admin_message(txn, &req.user_ids, &req.title, &req.body)
                    .await
            })
        })
        .await
        .map_err(flatten_txn)?;

    let queued = pending.len();
    state.notification_engine.dispatch_pushes(pending).await;
    Ok(ApiResponse::ok(DeliveryResponse {
        queued_push_count: queued,
    }))
}

/// System announcement payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemAnnouncementRequest {
    pub user_ids: Vec<i32>,
    pub title: String,
    pub body: String,
    /// Urgent announcements bypass type toggles and quiet hours.
    #[serde(default)]
    pub urgent: bool,
}

/// Send a system announcement to the listed users.
async fn send_system_announcement(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(req): Json<SystemAnnouncementRequest>,
) -> AppResult<ApiResponse<DeliveryResponse>> {
    if req.user_ids.is_empty() {
        return Err(AppError::validation("userIds", "at least one recipient"));
    }

    let engine = state.notification_engine.clone();
    let pending = state
        .db
        .transaction(move |txn| {
            Box::pin(async move {
                engine
                    .send_system_announcement(
                        txn,
                        &req.user_ids,
                        &req.title,
                        &req.body,
                        req.urgent,
                    )
                    .await
            })
        })
        .await
        .map_err(flatten_txn)?;

    let queued = pending.len();
    state.notification_engine.dispatch_pushes(pending).await;
    Ok(ApiResponse::ok(DeliveryResponse {
        queued_push_count: queued,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/message", post(send_admin_message))
        .route("/announcement", post(send_system_announcement))
}
