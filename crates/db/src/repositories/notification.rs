//! Notification repository.

use std::sync::Arc;

use cmsvs_common::AppResult;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::entities::{Notification, notification};

/// Notification repository for database operations.
#[derive(Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    /// Create a new notification repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a notification by ID.
    pub async fn find_by_id(&self, id: i32) -> AppResult<Option<notification::Model>> {
        Ok(Notification::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// Insert a notification inside a caller-owned transaction.
    ///
    /// Fan-out persists notifications in the same transaction as the
    /// lifecycle change, so a rollback removes both.
    pub async fn create_in<C: ConnectionTrait>(
        conn: &C,
        model: notification::ActiveModel,
    ) -> AppResult<notification::Model> {
        Ok(model.insert(conn).await?)
    }

    /// Notifications for a user, newest first.
    pub async fn find_by_user(
        &self,
        user_id: i32,
        limit: u64,
        offset: u64,
        unread_only: bool,
    ) -> AppResult<Vec<notification::Model>> {
        let mut query = Notification::find()
            .filter(notification::Column::UserId.eq(user_id))
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id);

        if unread_only {
            query = query.filter(notification::Column::IsRead.eq(false));
        }

        Ok(query
            .offset(offset)
            .limit(if limit == 0 { 50 } else { limit })
            .all(self.db.as_ref())
            .await?)
    }

    /// Mark one notification read. No-op if already read.
    pub async fn mark_read(
        &self,
        model: notification::Model,
        now: DateTimeWithTimeZone,
    ) -> AppResult<notification::Model> {
        if model.is_read {
            return Ok(model);
        }
        let mut active: notification::ActiveModel = model.into();
        active.is_read = Set(true);
        active.read_at = Set(Some(now));
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Mark all of a user's unread notifications read. Returns the count.
    pub async fn mark_all_read(
        &self,
        user_id: i32,
        now: DateTimeWithTimeZone,
    ) -> AppResult<u64> {
        let result = Notification::update_many()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .col_expr(notification::Column::IsRead, true.into())
            .col_expr(notification::Column::ReadAt, Expr::value(Some(now)))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Mark a notification sent after the push attempts finished.
    pub async fn mark_sent(&self, id: i32, now: DateTimeWithTimeZone) -> AppResult<()> {
        Notification::update_many()
            .filter(notification::Column::Id.eq(id))
            .filter(notification::Column::IsSent.eq(false))
            .col_expr(notification::Column::IsSent, true.into())
            .col_expr(notification::Column::SentAt, Expr::value(Some(now)))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Count unread notifications for a user.
    pub async fn count_unread(&self, user_id: i32) -> AppResult<u64> {
        Ok(Notification::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .count(self.db.as_ref())
            .await?)
    }

    /// Null the request link on every notification referencing a request.
    ///
    /// Records are retained for audit when the request is deleted.
    pub async fn null_request_links<C: ConnectionTrait>(
        conn: &C,
        request_id: i32,
    ) -> AppResult<u64> {
        let result = Notification::update_many()
            .filter(notification::Column::RequestId.eq(request_id))
            .col_expr(
                notification::Column::RequestId,
                Expr::value(None::<i32>),
            )
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
