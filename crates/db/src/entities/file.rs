//! Uploaded file entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Owning request
    #[sea_orm(indexed)]
    pub request_id: i32,

    /// Name as supplied by the uploader
    pub original_filename: String,

    /// Minted name, unique across all files
    #[sea_orm(unique)]
    pub stored_filename: String,

    /// Path under the upload root
    #[sea_orm(column_type = "Text")]
    pub file_path: String,

    /// Size in bytes
    pub file_size: i64,

    pub mime_type: String,

    /// Lower-case extension without the dot
    pub file_type: String,

    /// Document category, identifier-safe
    pub file_category: String,

    pub uploaded_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::request::Entity",
        from = "Column::RequestId",
        to = "super::request::Column::Id",
        on_delete = "Cascade"
    )]
    Request,
}

impl Related<super::request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Request.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
