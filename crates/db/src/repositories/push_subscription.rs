//! Push subscription repository.

use std::sync::Arc;

use chrono::Duration;
use cmsvs_common::AppResult;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, NotSet,
    QueryFilter, Set,
};
use tracing::info;

use crate::entities::{PushSubscription, push_subscription};

/// Fields supplied by the browser when subscribing.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: i32,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub device_name: Option<String>,
}

/// Push subscription repository for database operations.
#[derive(Clone)]
pub struct PushSubscriptionRepository {
    db: Arc<DatabaseConnection>,
}

impl PushSubscriptionRepository {
    /// Create a new push subscription repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a subscription by ID.
    pub async fn find_by_id(&self, id: i32) -> AppResult<Option<push_subscription::Model>> {
        Ok(PushSubscription::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    /// Active subscriptions of a user, the delivery fan-out set.
    pub async fn find_active_by_user(
        &self,
        user_id: i32,
    ) -> AppResult<Vec<push_subscription::Model>> {
        Ok(PushSubscription::find()
            .filter(push_subscription::Column::UserId.eq(user_id))
            .filter(push_subscription::Column::IsActive.eq(true))
            .all(self.db.as_ref())
            .await?)
    }

    /// Register a subscription, updating and reactivating an existing row
    /// for the same (user, endpoint).
    pub async fn upsert(
        &self,
        new: NewSubscription,
        now: DateTimeWithTimeZone,
    ) -> AppResult<push_subscription::Model> {
        let existing = PushSubscription::find()
            .filter(push_subscription::Column::UserId.eq(new.user_id))
            .filter(push_subscription::Column::Endpoint.eq(new.endpoint.as_str()))
            .one(self.db.as_ref())
            .await?;

        if let Some(existing) = existing {
            let mut active: push_subscription::ActiveModel = existing.into();
            active.p256dh = Set(new.p256dh);
            active.auth = Set(new.auth);
            active.user_agent = Set(new.user_agent);
            active.device_name = Set(new.device_name);
            active.is_active = Set(true);
            active.updated_at = Set(Some(now));
            return Ok(active.update(self.db.as_ref()).await?);
        }

        let model = push_subscription::ActiveModel {
            id: NotSet,
            user_id: Set(new.user_id),
            endpoint: Set(new.endpoint),
            p256dh: Set(new.p256dh),
            auth: Set(new.auth),
            user_agent: Set(new.user_agent),
            device_name: Set(new.device_name),
            is_active: Set(true),
            last_used_at: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };
        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Soft-deactivate a subscription, keeping the row.
    pub async fn deactivate(&self, id: i32, now: DateTimeWithTimeZone) -> AppResult<()> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(());
        };
        if !existing.is_active {
            return Ok(());
        }
        let mut active: push_subscription::ActiveModel = existing.into();
        active.is_active = Set(false);
        active.updated_at = Set(Some(now));
        active.update(self.db.as_ref()).await?;
        info!(subscription_id = id, "Deactivated push subscription");
        Ok(())
    }

    /// Deactivate by (user, endpoint); used for explicit unsubscribe.
    pub async fn deactivate_by_endpoint(
        &self,
        user_id: i32,
        endpoint: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<bool> {
        let result = PushSubscription::update_many()
            .filter(push_subscription::Column::UserId.eq(user_id))
            .filter(push_subscription::Column::Endpoint.eq(endpoint))
            .filter(push_subscription::Column::IsActive.eq(true))
            .col_expr(push_subscription::Column::IsActive, false.into())
            .col_expr(
                push_subscription::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(Some(now)),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Record a successful delivery.
    pub async fn touch(&self, id: i32, now: DateTimeWithTimeZone) -> AppResult<()> {
        PushSubscription::update_many()
            .filter(push_subscription::Column::Id.eq(id))
            .col_expr(
                push_subscription::Column::LastUsedAt,
                sea_orm::sea_query::Expr::value(Some(now)),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete inactive subscriptions untouched for `days`. Returns the count.
    pub async fn cleanup_inactive(
        &self,
        days: i64,
        now: DateTimeWithTimeZone,
    ) -> AppResult<u64> {
        let cutoff = now - Duration::days(days);
        let result = PushSubscription::delete_many()
            .filter(push_subscription::Column::IsActive.eq(false))
            .filter(
                Condition::any()
                    .add(push_subscription::Column::UpdatedAt.lt(cutoff))
                    .add(
                        Condition::all()
                            .add(push_subscription::Column::UpdatedAt.is_null())
                            .add(push_subscription::Column::CreatedAt.lt(cutoff)),
                    ),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
