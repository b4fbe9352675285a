//! Push subscription entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Web Push subscription registered by a browser.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "push_subscription")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub user_id: i32,

    /// Push gateway endpoint URL; unique per user
    #[sea_orm(column_type = "Text")]
    pub endpoint: String,

    /// P256DH key from the browser subscription
    pub p256dh: String,

    /// Auth secret from the browser subscription
    pub auth: String,

    #[sea_orm(nullable)]
    pub user_agent: Option<String>,

    #[sea_orm(nullable)]
    pub device_name: Option<String>,

    /// Deactivation is soft; dead endpoints are never deleted here
    #[sea_orm(default_value = true)]
    pub is_active: bool,

    #[sea_orm(nullable)]
    pub last_used_at: Option<DateTimeWithTimeZone>,

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
