//! Notification endpoints.

use axum::{Json, Router, extract::State, routing::post};
use cmsvs_common::AppResult;
use cmsvs_db::entities::notification::{
    Model as NotificationModel, NotificationPriority, NotificationType,
};
use cmsvs_db::entities::push_subscription::Model as SubscriptionModel;
use cmsvs_db::repositories::NewSubscription;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// List notifications payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsRequest {
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
    /// Only unread notifications.
    #[serde(default)]
    pub unread_only: bool,
    /// Include the unread count in the response.
    #[serde(default)]
    pub with_unread_count: bool,
}

const fn default_limit() -> u64 {
    20
}

/// Notifications response with optional metadata.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsListResponse {
    pub notifications: Vec<NotificationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u64>,
}

/// Notification response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: i32,
    pub created_at: String,
    pub is_read: bool,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
}

impl From<NotificationModel> for NotificationResponse {
    fn from(n: NotificationModel) -> Self {
        Self {
            id: n.id,
            created_at: n.created_at.to_rfc3339(),
            is_read: n.is_read,
            notification_type: n.notification_type,
            priority: n.priority,
            title: n.title,
            body: n.body,
            action_url: n.action_url,
            request_id: n.request_id,
            read_at: n.read_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Get notifications for the authenticated user, newest first.
async fn list_notifications(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListNotificationsRequest>,
) -> AppResult<ApiResponse<NotificationsListResponse>> {
    let limit = req.limit.min(100);
    let notifications = state
        .notification_engine
        .list(user.id, limit, req.offset, req.unread_only)
        .await?;

    let unread_count = if req.with_unread_count {
        Some(state.notification_engine.unread_count(user.id).await?)
    } else {
        None
    };

    Ok(ApiResponse::ok(NotificationsListResponse {
        notifications: notifications.into_iter().map(Into::into).collect(),
        unread_count,
    }))
}

/// Mark notification as read payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadRequest {
    pub notification_id: i32,
}

/// Mark a notification as read. Idempotent.
async fn mark_as_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<MarkAsReadRequest>,
) -> AppResult<ApiResponse<NotificationResponse>> {
    let updated = state
        .notification_engine
        .mark_read(req.notification_id, user.id)
        .await?;
    Ok(ApiResponse::ok(updated.into()))
}

/// Mark all as read response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllAsReadResponse {
    pub count: u64,
}

/// Mark all notifications as read.
async fn mark_all_as_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<MarkAllAsReadResponse>> {
    let count = state.notification_engine.mark_all_read(user.id).await?;
    Ok(ApiResponse::ok(MarkAllAsReadResponse { count }))
}

/// Unread count response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub count: u64,
}

/// Get unread notification count.
async fn unread_count(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<UnreadCountResponse>> {
    let count = state.notification_engine.unread_count(user.id).await?;
    Ok(ApiResponse::ok(UnreadCountResponse { count }))
}

/// Notification preferences response and update payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesResponse {
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub email_enabled: bool,
    pub status_notifications: bool,
    pub update_notifications: bool,
    pub admin_message_notifications: bool,
    pub system_announcement_notifications: bool,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
}

/// Get the authenticated user's preferences, creating defaults on first use.
async fn get_preferences(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<PreferencesResponse>> {
    let prefs = state
        .preference_repo
        .get_or_create(user.id, state.clock.now().into())
        .await?;
    Ok(ApiResponse::ok(PreferencesResponse {
        push_enabled: prefs.push_enabled,
        in_app_enabled: prefs.in_app_enabled,
        email_enabled: prefs.email_enabled,
        status_notifications: prefs.status_notifications,
        update_notifications: prefs.update_notifications,
        admin_message_notifications: prefs.admin_message_notifications,
        system_announcement_notifications: prefs.system_announcement_notifications,
        quiet_hours_enabled: prefs.quiet_hours_enabled,
        quiet_hours_start: prefs.quiet_hours_start,
        quiet_hours_end: prefs.quiet_hours_end,
    }))
}

/// Update preferences payload. Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreferencesRequest {
    pub push_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub status_notifications: Option<bool>,
    pub update_notifications: Option<bool>,
    pub admin_message_notifications: Option<bool>,
    pub system_announcement_notifications: Option<bool>,
    pub quiet_hours_enabled: Option<bool>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
}

/// Update the authenticated user's preferences.
async fn update_preferences(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UpdatePreferencesRequest>,
) -> AppResult<ApiResponse<PreferencesResponse>> {
    let now = state.clock.now();
    let prefs = state.preference_repo.get_or_create(user.id, now.into()).await?;

    let mut active: cmsvs_db::entities::notification_preference::ActiveModel = prefs.into();
    if let Some(v) = req.push_enabled {
        active.push_enabled = Set(v);
    }
    if let Some(v) = req.in_app_enabled {
        active.in_app_enabled = Set(v);
    }
    if let Some(v) = req.email_enabled {
        active.email_enabled = Set(v);
    }
    if let Some(v) = req.status_notifications {
        active.status_notifications = Set(v);
    }
    if let Some(v) = req.update_notifications {
        active.update_notifications = Set(v);
    }
    if let Some(v) = req.admin_message_notifications {
        active.admin_message_notifications = Set(v);
    }
    if let Some(v) = req.system_announcement_notifications {
        active.system_announcement_notifications = Set(v);
    }
    if let Some(v) = req.quiet_hours_enabled {
        active.quiet_hours_enabled = Set(v);
    }
    if let Some(v) = req.quiet_hours_start {
        active.quiet_hours_start = Set(Some(v));
    }
    if let Some(v) = req.quiet_hours_end {
        active.quiet_hours_end = Set(Some(v));
    }
    active.updated_at = Set(Some(now.into()));

    let updated = state.preference_repo.update(active).await?;
    Ok(ApiResponse::ok(PreferencesResponse {
        push_enabled: updated.push_enabled,
        in_app_enabled: updated.in_app_enabled,
        email_enabled: updated.email_enabled,
        status_notifications: updated.status_notifications,
        update_notifications: updated.update_notifications,
        admin_message_notifications: updated.admin_message_notifications,
        system_announcement_notifications: updated.system_announcement_notifications,
        quiet_hours_enabled: updated.quiet_hours_enabled,
        quiet_hours_start: updated.quiet_hours_start,
        quiet_hours_end: updated.quiet_hours_end,
    }))
}

/// Subscribe payload, as delivered by the browser push API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub device_name: Option<String>,
}

/// Push subscription response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: i32,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
    pub created_at: String,
}

impl From<SubscriptionModel> for SubscriptionResponse {
    fn from(s: SubscriptionModel) -> Self {
        Self {
            id: s.id,
            endpoint: s.endpoint,
            device_name: s.device_name,
            is_active: s.is_active,
            last_used_at: s.last_used_at.map(|t| t.to_rfc3339()),
            created_at: s.created_at.to_rfc3339(),
        }
    }
}

/// Register a push subscription, reactivating an existing endpoint.
async fn subscribe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> AppResult<ApiResponse<SubscriptionResponse>> {
    let subscription = state
        .subscription_repo
        .upsert(
            NewSubscription {
                user_id: user.id,
                endpoint: req.endpoint,
                p256dh: req.p256dh,
                auth: req.auth,
                user_agent: req.user_agent,
                device_name: req.device_name,
            },
            state.clock.now().into(),
        )
        .await?;
    Ok(ApiResponse::ok(subscription.into()))
}

/// Unsubscribe payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

/// Unsubscribe response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeResponse {
    pub removed: bool,
}

/// Soft-deactivate a push subscription.
async fn unsubscribe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UnsubscribeRequest>,
) -> AppResult<ApiResponse<UnsubscribeResponse>> {
    let removed = state
        .subscription_repo
        .deactivate_by_endpoint(user.id, &req.endpoint, state.clock.now().into())
        .await?;
    Ok(ApiResponse::ok(UnsubscribeResponse { removed }))
}

/// List the authenticated user's active push subscriptions.
async fn list_subscriptions(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<SubscriptionResponse>>> {
    let subscriptions = state.subscription_repo.find_active_by_user(user.id).await?;
    Ok(ApiResponse::ok(
        subscriptions.into_iter().map(Into::into).collect(),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/list", post(list_notifications))
        .route("/mark-as-read", post(mark_as_read))
        .route("/mark-all-as-read", post(mark_all_as_read))
        .route("/unread-count", post(unread_count))
        .route("/preferences", post(get_preferences))
        .route("/preferences/update", post(update_preferences))
        .route("/push/subscribe", post(subscribe))
        .route("/push/unsubscribe", post(unsubscribe))
        .route("/push/subscriptions", post(list_subscriptions))
}
