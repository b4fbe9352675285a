//! Request repository.

use std::sync::Arc;

use cmsvs_common::AppResult;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::entities::{Request, request};

/// Filters for request listings.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Restrict to one owner.
    pub user_id: Option<i32>,
    /// Restrict to one status.
    pub status: Option<request::RequestStatus>,
    /// Restrict by archival flag.
    pub is_archived: Option<bool>,
    /// Page size.
    pub limit: u64,
    /// Page offset.
    pub offset: u64,
}

/// Request repository for database operations.
#[derive(Clone)]
pub struct RequestRepository {
    db: Arc<DatabaseConnection>,
}

impl RequestRepository {
    /// Create a new request repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a request by ID.
    pub async fn find_by_id(&self, id: i32) -> AppResult<Option<request::Model>> {
        Ok(Request::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// Find a request by its human-readable number.
    pub async fn find_by_number(&self, request_number: &str) -> AppResult<Option<request::Model>> {
        Ok(Request::find()
            .filter(request::Column::RequestNumber.eq(request_number))
            .one(self.db.as_ref())
            .await?)
    }

    /// Find a request by its unique code.
    pub async fn find_by_unique_code(&self, unique_code: &str) -> AppResult<Option<request::Model>> {
        Ok(Request::find()
            .filter(request::Column::UniqueCode.eq(unique_code))
            .one(self.db.as_ref())
            .await?)
    }

    /// Whether a request number is already taken.
    pub async fn number_exists(&self, request_number: &str) -> AppResult<bool> {
        let count = Request::find()
            .filter(request::Column::RequestNumber.eq(request_number))
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }

    /// Whether a unique code is already taken.
    pub async fn code_exists(&self, unique_code: &str) -> AppResult<bool> {
        let count = Request::find()
            .filter(request::Column::UniqueCode.eq(unique_code))
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }

    /// Find a request and take a row-level exclusive lock on it.
    ///
    /// Must run inside a transaction; concurrent transitions on the same
    /// request serialize on this lock.
    pub async fn find_for_update<C: ConnectionTrait>(
        conn: &C,
        id: i32,
    ) -> AppResult<Option<request::Model>> {
        Ok(Request::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await?)
    }

    /// Create a new request.
    pub async fn create(&self, model: request::ActiveModel) -> AppResult<request::Model> {
        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// List requests matching a filter, newest first.
    pub async fn list(&self, filter: &RequestFilter) -> AppResult<Vec<request::Model>> {
        let mut query = Request::find().order_by_desc(request::Column::CreatedAt);

        if let Some(user_id) = filter.user_id {
            query = query.filter(request::Column::UserId.eq(user_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(request::Column::Status.eq(status));
        }
        if let Some(is_archived) = filter.is_archived {
            query = query.filter(request::Column::IsArchived.eq(is_archived));
        }

        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        Ok(query
            .offset(filter.offset)
            .limit(limit)
            .all(self.db.as_ref())
            .await?)
    }

    /// Count requests matching a filter.
    pub async fn count(&self, filter: &RequestFilter) -> AppResult<u64> {
        let mut query = Request::find();

        if let Some(user_id) = filter.user_id {
            query = query.filter(request::Column::UserId.eq(user_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(request::Column::Status.eq(status));
        }
        if let Some(is_archived) = filter.is_archived {
            query = query.filter(request::Column::IsArchived.eq(is_archived));
        }

        Ok(query.count(self.db.as_ref()).await?)
    }
}
