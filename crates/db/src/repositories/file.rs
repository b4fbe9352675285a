//! File repository.

use std::sync::Arc;

use cmsvs_common::AppResult;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};

use crate::entities::{File, file};

/// File repository for database operations.
#[derive(Clone)]
pub struct FileRepository {
    db: Arc<DatabaseConnection>,
}

impl FileRepository {
    /// Create a new file repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a file by ID.
    pub async fn find_by_id(&self, id: i32) -> AppResult<Option<file::Model>> {
        Ok(File::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// Create a new file record.
    pub async fn create(&self, model: file::ActiveModel) -> AppResult<file::Model> {
        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// All files attached to a request, in upload order.
    pub async fn find_by_request(&self, request_id: i32) -> AppResult<Vec<file::Model>> {
        Ok(File::find()
            .filter(file::Column::RequestId.eq(request_id))
            .order_by_asc(file::Column::UploadedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Whether a stored filename is already taken.
    pub async fn stored_name_exists(&self, stored_filename: &str) -> AppResult<bool> {
        let count = File::find()
            .filter(file::Column::StoredFilename.eq(stored_filename))
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }

    /// Files of a request, fetched inside a caller-owned transaction.
    pub async fn find_by_request_in<C: ConnectionTrait>(
        conn: &C,
        request_id: i32,
    ) -> AppResult<Vec<file::Model>> {
        Ok(File::find()
            .filter(file::Column::RequestId.eq(request_id))
            .all(conn)
            .await?)
    }

    /// Delete every file record of a request. Returns the count removed.
    pub async fn delete_by_request<C: ConnectionTrait>(
        conn: &C,
        request_id: i32,
    ) -> AppResult<u64> {
        let result = File::delete_many()
            .filter(file::Column::RequestId.eq(request_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
