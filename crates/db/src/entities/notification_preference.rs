//! Per-user notification preferences entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per user; created with defaults on first consult.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_preference")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub user_id: i32,

    // Channel toggles
    #[sea_orm(default_value = true)]
    pub push_enabled: bool,

    #[sea_orm(default_value = true)]
    pub in_app_enabled: bool,

    #[sea_orm(default_value = false)]
    pub email_enabled: bool,

    // Per-type toggles
    #[sea_orm(default_value = true)]
    pub status_notifications: bool,

    #[sea_orm(default_value = true)]
    pub update_notifications: bool,

    #[sea_orm(default_value = true)]
    pub admin_message_notifications: bool,

    #[sea_orm(default_value = true)]
    pub system_announcement_notifications: bool,

    // Quiet hours, `HH:MM` strings in the application timezone
    #[sea_orm(default_value = false)]
    pub quiet_hours_enabled: bool,

    #[sea_orm(nullable)]
    pub quiet_hours_start: Option<String>,

    #[sea_orm(nullable)]
    pub quiet_hours_end: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
