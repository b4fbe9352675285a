//! Notification entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    #[sea_orm(string_value = "request_status_changed")]
    RequestStatusChanged,
    #[sea_orm(string_value = "request_created")]
    RequestCreated,
    #[sea_orm(string_value = "request_updated")]
    RequestUpdated,
    #[sea_orm(string_value = "request_archived")]
    RequestArchived,
    #[sea_orm(string_value = "request_deleted")]
    RequestDeleted,
    #[sea_orm(string_value = "admin_message")]
    AdminMessage,
    #[sea_orm(string_value = "system_announcement")]
    SystemAnnouncement,
}

/// Notification priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    #[sea_orm(string_value = "low")]
    Low,
    #[sea_orm(string_value = "normal")]
    Normal,
    #[sea_orm(string_value = "high")]
    High,
    #[sea_orm(string_value = "urgent")]
    Urgent,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Recipient
    #[sea_orm(indexed)]
    pub user_id: i32,

    pub notification_type: NotificationType,

    pub priority: NotificationPriority,

    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    #[sea_orm(nullable)]
    pub action_url: Option<String>,

    /// Related request; nulled when the request is deleted
    #[sea_orm(nullable)]
    pub request_id: Option<i32>,

    /// User who triggered the notification, when distinct from the recipient
    #[sea_orm(nullable)]
    pub related_user_id: Option<i32>,

    #[sea_orm(default_value = false)]
    pub is_read: bool,

    #[sea_orm(default_value = false)]
    pub is_sent: bool,

    #[sea_orm(nullable)]
    pub read_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub sent_at: Option<DateTimeWithTimeZone>,

    /// Free-form key/value payload
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub extra_data: Option<Json>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Recipient,

    #[sea_orm(
        belongs_to = "super::request::Entity",
        from = "Column::RequestId",
        to = "super::request::Column::Id",
        on_delete = "SetNull"
    )]
    Request,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::RelatedUserId",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    RelatedUser,
}

impl ActiveModelBehavior for ActiveModel {}
