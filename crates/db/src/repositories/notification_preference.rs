//! Notification preference repository.

use std::sync::Arc;

use cmsvs_common::AppResult;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, NotSet,
    QueryFilter, Set,
};

use crate::entities::{NotificationPreference, notification_preference};

/// Notification preference repository for database operations.
#[derive(Clone)]
pub struct NotificationPreferenceRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationPreferenceRepository {
    /// Create a new notification preference repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find preferences for a user.
    pub async fn find_by_user(
        &self,
        user_id: i32,
    ) -> AppResult<Option<notification_preference::Model>> {
        Ok(NotificationPreference::find()
            .filter(notification_preference::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?)
    }

    /// Fetch a user's preferences, creating the default row on first consult.
    pub async fn get_or_create(
        &self,
        user_id: i32,
        now: DateTimeWithTimeZone,
    ) -> AppResult<notification_preference::Model> {
        Self::get_or_create_in(self.db.as_ref(), user_id, now).await
    }

    /// Same as [`Self::get_or_create`] inside a caller-owned transaction.
    pub async fn get_or_create_in<C: ConnectionTrait>(
        conn: &C,
        user_id: i32,
        now: DateTimeWithTimeZone,
    ) -> AppResult<notification_preference::Model> {
        if let Some(existing) = NotificationPreference::find()
            .filter(notification_preference::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }

        Ok(Self::default_model(user_id, now).insert(conn).await?)
    }

    /// Update a user's preferences.
    pub async fn update(
        &self,
        model: notification_preference::ActiveModel,
    ) -> AppResult<notification_preference::Model> {
        Ok(model.update(self.db.as_ref()).await?)
    }

    fn default_model(
        user_id: i32,
        now: DateTimeWithTimeZone,
    ) -> notification_preference::ActiveModel {
        notification_preference::ActiveModel {
            id: NotSet,
            user_id: Set(user_id),
            push_enabled: Set(true),
            in_app_enabled: Set(true),
            email_enabled: Set(false),
            status_notifications: Set(true),
            update_notifications: Set(true),
            admin_message_notifications: Set(true),
            system_announcement_notifications: Set(true),
            quiet_hours_enabled: Set(false),
            quiet_hours_start: Set(None),
            quiet_hours_end: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        }
    }
}
