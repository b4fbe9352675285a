//! Request entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Request lifecycle statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl RequestStatus {
    /// Terminal statuses admit archival and may be reopened by an admin.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "request")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Human-readable number, `REQ-<yyyymmddHHMMSS>`
    #[sea_orm(unique)]
    pub request_number: String,

    /// 12-character uppercase code shown to applicants
    #[sea_orm(unique)]
    pub unique_code: String,

    /// Owning user
    #[sea_orm(indexed)]
    pub user_id: i32,

    pub status: RequestStatus,

    #[sea_orm(default_value = false)]
    pub is_archived: bool,

    // Applicant details
    pub full_name: String,

    /// Exactly nine digits
    pub personal_number: String,

    pub phone_number: String,

    // Building details
    pub building_name: String,
    pub road_name: String,
    pub building_number: String,

    #[sea_orm(nullable)]
    pub civil_defense_file_number: Option<String>,

    #[sea_orm(nullable)]
    pub building_permit_number: Option<String>,

    // Section flags; at least one is true, enforced at create time
    #[sea_orm(default_value = false)]
    pub licenses_section: bool,

    #[sea_orm(default_value = false)]
    pub fire_equipment_section: bool,

    #[sea_orm(default_value = false)]
    pub commercial_records_section: bool,

    #[sea_orm(default_value = false)]
    pub engineering_offices_section: bool,

    #[sea_orm(default_value = false)]
    pub hazardous_materials_section: bool,

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

    #[sea_orm(has_many = "super::file::Entity")]
    Files,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Files.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether any section flag is set.
    #[must_use]
    pub const fn has_section(&self) -> bool {
        self.licenses_section
            || self.fire_equipment_section
            || self.commercial_records_section
            || self.engineering_offices_section
            || self.hazardous_materials_section
    }
}
