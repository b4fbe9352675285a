//! Notification engine.
//!
//! Translates request lifecycle events into persisted notifications,
//! consulting per-user preferences and quiet hours, and hands push-eligible
//! notifications to the queue after the owning transaction commits.

use std::sync::Arc;

use cmsvs_common::{AppError, AppResult, Clock};
use cmsvs_db::entities::notification::{self, NotificationPriority, NotificationType};
use cmsvs_db::entities::request::RequestStatus;
use cmsvs_db::entities::{User, notification_preference, user};
use cmsvs_db::repositories::{NotificationPreferenceRepository, NotificationRepository};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, NotSet, QueryFilter, Set};
use tracing::{debug, warn};

use crate::services::events::LifecycleEvent;
use crate::services::push::{PushDispatch, PushJob};

/// A persisted notification awaiting push delivery after commit.
#[derive(Debug, Clone)]
pub struct PendingPush {
    pub notification: notification::Model,
}

/// Notification engine for lifecycle fan-out and the read/sent lifecycle.
#[derive(Clone)]
pub struct NotificationEngine {
    clock: Clock,
    notification_repo: NotificationRepository,
    dispatch: Option<Arc<dyn PushDispatch>>,
}

impl NotificationEngine {
    /// Create a new notification engine.
    #[must_use]
    pub const fn new(clock: Clock, notification_repo: NotificationRepository) -> Self {
        Self {
            clock,
            notification_repo,
            dispatch: None,
        }
    }

    /// Set the push dispatcher. Without one, notifications stay in-app only.
    pub fn set_dispatch(&mut self, dispatch: Arc<dyn PushDispatch>) {
        self.dispatch = Some(dispatch);
    }

    /// Persist notifications for a lifecycle event.
    ///
    /// Runs inside the transaction that applies the lifecycle change, so a
    /// rollback removes both. Returns the push-eligible subset; the caller
    /// hands it to [`Self::dispatch_pushes`] after commit.
    pub async fn fan_out<C: ConnectionTrait>(
        &self,
        conn: &C,
        event: &LifecycleEvent,
    ) -> AppResult<Vec<PendingPush>> {
        let content = event_content(event);
        let recipients = self.resolve_recipients(conn, event).await?;

        let mut pending = Vec::new();
        for recipient_id in recipients {
            if let Some(p) = self
                .deliver_to(conn, recipient_id, &content)
                .await?
            {
                pending.push(p);
            }
        }
        Ok(pending)
    }

    /// Send an admin message to an explicit recipient list.
    pub async fn send_admin_message<C: ConnectionTrait>(
        &self,
        conn: &C,
        recipient_ids: &[i32],
        title: &str,
        body: &str,
    ) -> AppResult<Vec<PendingPush>> {
        let content = Content {
            notification_type: NotificationType::AdminMessage,
            priority: NotificationPriority::High,
            title: title.to_string(),
            body: body.to_string(),
            action_url: None,
            request_id: None,
            related_user_id: None,
        };
        self.deliver_to_all(conn, recipient_ids, &content).await
    }

    /// Send a system announcement to an explicit recipient list.
    ///
    /// Urgent announcements bypass the per-type toggle and quiet hours.
    pub async fn send_system_announcement<C: ConnectionTrait>(
        &self,
        conn: &C,
        recipient_ids: &[i32],
        title: &str,
        body: &str,
        urgent: bool,
    ) -> AppResult<Vec<PendingPush>> {
        let content = Content {
            notification_type: NotificationType::SystemAnnouncement,
            priority: if urgent {
                NotificationPriority::Urgent
            } else {
                NotificationPriority::Normal
            },
            title: title.to_string(),
            body: body.to_string(),
            action_url: None,
            request_id: None,
            related_user_id: None,
        };
        self.deliver_to_all(conn, recipient_ids, &content).await
    }

    /// Hand push-eligible notifications to the queue. Fire-and-forget:
    /// enqueue failures are logged, never surfaced.
    pub async fn dispatch_pushes(&self, pending: Vec<PendingPush>) {
        let Some(dispatch) = &self.dispatch else {
            if !pending.is_empty() {
                debug!(
                    count = pending.len(),
                    "No push dispatcher configured, skipping deliveries"
                );
            }
            return;
        };

        for p in pending {
            let job = PushJob {
                notification_id: p.notification.id,
                user_id: p.notification.user_id,
                title: p.notification.title.clone(),
                body: p.notification.body.clone(),
                action_url: p.notification.action_url.clone(),
            };
            if let Err(e) = dispatch.enqueue(job).await {
                warn!(
                    error = %e,
                    notification_id = p.notification.id,
                    "Failed to enqueue push delivery"
                );
            }
        }
    }

    /// Notifications for a user, newest first.
    pub async fn list(
        &self,
        user_id: i32,
        limit: u64,
        offset: u64,
        unread_only: bool,
    ) -> AppResult<Vec<notification::Model>> {
        self.notification_repo
            .find_by_user(user_id, limit, offset, unread_only)
            .await
    }

    /// Count unread notifications for a user.
    pub async fn unread_count(&self, user_id: i32) -> AppResult<u64> {
        self.notification_repo.count_unread(user_id).await
    }

    /// Mark one notification read. Idempotent; requires ownership.
    pub async fn mark_read(
        &self,
        notification_id: i32,
        user_id: i32,
    ) -> AppResult<notification::Model> {
        let model = self
            .notification_repo
            .find_by_id(notification_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("notification {notification_id}")))?;

        if model.user_id != user_id {
            return Err(AppError::Forbidden(
                "notification belongs to another user".to_string(),
            ));
        }

        self.notification_repo
            .mark_read(model, self.clock.now().into())
            .await
    }

    /// Mark every unread notification of a user read. Returns the count.
    pub async fn mark_all_read(&self, user_id: i32) -> AppResult<u64> {
        self.notification_repo
            .mark_all_read(user_id, self.clock.now().into())
            .await
    }

    async fn resolve_recipients<C: ConnectionTrait>(
        &self,
        conn: &C,
        event: &LifecycleEvent,
    ) -> AppResult<Vec<i32>> {
        match event {
            // Creation notifies every active admin, never the owner.
            LifecycleEvent::Created { request } => {
                let admins = User::find()
                    .filter(user::Column::Role.eq(user::UserRole::Admin))
                    .filter(user::Column::IsActive.eq(true))
                    .all(conn)
                    .await?;
                Ok(admins
                    .into_iter()
                    .map(|a| a.id)
                    .filter(|id| *id != request.user_id)
                    .collect())
            }
            LifecycleEvent::StatusChanged { request, .. }
            | LifecycleEvent::Updated { request }
            | LifecycleEvent::Archived { request, .. }
            | LifecycleEvent::Deleted { request } => Ok(vec![request.user_id]),
        }
    }

    async fn deliver_to_all<C: ConnectionTrait>(
        &self,
        conn: &C,
        recipient_ids: &[i32],
        content: &Content,
    ) -> AppResult<Vec<PendingPush>> {
        let mut pending = Vec::new();
        for &recipient_id in recipient_ids {
            if let Some(p) = self.deliver_to(conn, recipient_id, content).await? {
                pending.push(p);
            }
        }
        Ok(pending)
    }

    /// Apply the preference gates for one recipient and persist if eligible.
    async fn deliver_to<C: ConnectionTrait>(
        &self,
        conn: &C,
        recipient_id: i32,
        content: &Content,
    ) -> AppResult<Option<PendingPush>> {
        let now = self.clock.now();
        let prefs =
            NotificationPreferenceRepository::get_or_create_in(conn, recipient_id, now.into())
                .await?;

        if !type_enabled(&prefs, content.notification_type, content.priority) {
            debug!(
                user_id = recipient_id,
                notification_type = ?content.notification_type,
                "Notification suppressed by type preference"
            );
            return Ok(None);
        }

        if !prefs.in_app_enabled {
            debug!(user_id = recipient_id, "In-app channel disabled, skipping");
            return Ok(None);
        }

        let model = notification::ActiveModel {
            id: NotSet,
            user_id: Set(recipient_id),
            notification_type: Set(content.notification_type),
            priority: Set(content.priority),
            title: Set(content.title.clone()),
            body: Set(content.body.clone()),
            action_url: Set(content.action_url.clone()),
            request_id: Set(content.request_id),
            related_user_id: Set(content.related_user_id),
            is_read: Set(false),
            is_sent: Set(false),
            read_at: Set(None),
            sent_at: Set(None),
            extra_data: Set(None),
            created_at: Set(now.into()),
        };
        let persisted = NotificationRepository::create_in(conn, model).await?;

        let local_hhmm = self.clock.to_local(now).format("%H:%M").to_string();
        if push_eligible(&prefs, content.priority, &local_hhmm) {
            Ok(Some(PendingPush {
                notification: persisted,
            }))
        } else {
            Ok(None)
        }
    }
}

struct Content {
    notification_type: NotificationType,
    priority: NotificationPriority,
    title: String,
    body: String,
    action_url: Option<String>,
    request_id: Option<i32>,
    related_user_id: Option<i32>,
}

fn event_content(event: &LifecycleEvent) -> Content {
    let request = event.request();
    let action_url = Some(format!("/requests/{}", request.id));

    match event {
        LifecycleEvent::Created { request } => Content {
            notification_type: NotificationType::RequestCreated,
            priority: NotificationPriority::Normal,
            title: format!("New request {}", request.request_number),
            body: format!(
                "{} submitted request {}",
                request.full_name, request.request_number
            ),
            action_url,
            request_id: Some(request.id),
            related_user_id: Some(request.user_id),
        },
        LifecycleEvent::StatusChanged { request, old, new } => Content {
            notification_type: NotificationType::RequestStatusChanged,
            priority: priority_for_status(*new),
            title: format!("Request {} status changed", request.request_number),
            body: format!("Status moved from {} to {}", status_label(*old), status_label(*new)),
            action_url,
            request_id: Some(request.id),
            related_user_id: None,
        },
        LifecycleEvent::Updated { request } => Content {
            notification_type: NotificationType::RequestUpdated,
            priority: NotificationPriority::Normal,
            title: format!("Request {} updated", request.request_number),
            body: "Request details were updated".to_string(),
            action_url,
            request_id: Some(request.id),
            related_user_id: None,
        },
        LifecycleEvent::Archived { request, archived } => Content {
            notification_type: NotificationType::RequestArchived,
            priority: NotificationPriority::Low,
            title: if *archived {
                format!("Request {} archived", request.request_number)
            } else {
                format!("Request {} unarchived", request.request_number)
            },
            body: format!(
                "Request {} was {}",
                request.request_number,
                if *archived { "archived" } else { "restored from the archive" }
            ),
            action_url,
            request_id: Some(request.id),
            related_user_id: None,
        },
        // The request row is gone after commit, so no link is stored.
        LifecycleEvent::Deleted { request } => Content {
            notification_type: NotificationType::RequestDeleted,
            priority: NotificationPriority::High,
            title: format!("Request {} deleted", request.request_number),
            body: format!(
                "Request {} and its attachments were removed",
                request.request_number
            ),
            action_url: None,
            request_id: None,
            related_user_id: None,
        },
    }
}

/// Priority of a status-change notice: terminal outcomes are high priority.
#[must_use]
pub fn priority_for_status(new: RequestStatus) -> NotificationPriority {
    if new.is_terminal() {
        NotificationPriority::High
    } else {
        NotificationPriority::Normal
    }
}

const fn status_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::InProgress => "in progress",
        RequestStatus::Completed => "completed",
        RequestStatus::Rejected => "rejected",
    }
}

/// Whether the recipient's per-type toggle admits this notification.
///
/// Urgent system announcements bypass the toggle.
#[must_use]
pub fn type_enabled(
    prefs: &notification_preference::Model,
    notification_type: NotificationType,
    priority: NotificationPriority,
) -> bool {
    match notification_type {
        NotificationType::RequestStatusChanged => prefs.status_notifications,
        NotificationType::RequestCreated
        | NotificationType::RequestUpdated
        | NotificationType::RequestArchived
        | NotificationType::RequestDeleted => prefs.update_notifications,
        NotificationType::AdminMessage => prefs.admin_message_notifications,
        NotificationType::SystemAnnouncement => {
            priority == NotificationPriority::Urgent || prefs.system_announcement_notifications
        }
    }
}

/// Whether a persisted notification should also produce push deliveries.
///
/// Urgent priority bypasses quiet hours but not the channel toggle.
#[must_use]
pub fn push_eligible(
    prefs: &notification_preference::Model,
    priority: NotificationPriority,
    local_hhmm: &str,
) -> bool {
    if !prefs.push_enabled {
        return false;
    }
    if priority == NotificationPriority::Urgent {
        return true;
    }
    !within_quiet_hours(prefs, local_hhmm)
}

/// Whether `local_hhmm` falls inside the configured quiet window.
///
/// Windows may wrap around midnight, e.g. 22:00–06:00. Bounds are
/// inclusive. Malformed or missing bounds read as "not quiet".
#[must_use]
pub fn within_quiet_hours(prefs: &notification_preference::Model, local_hhmm: &str) -> bool {
    if !prefs.quiet_hours_enabled {
        return false;
    }
    let (Some(start), Some(end)) = (
        prefs.quiet_hours_start.as_deref().and_then(parse_hhmm),
        prefs.quiet_hours_end.as_deref().and_then(parse_hhmm),
    ) else {
        return false;
    };
    let Some(now) = parse_hhmm(local_hhmm) else {
        return false;
    };

    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

/// Minutes since midnight for an `HH:MM` string.
fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn prefs() -> notification_preference::Model {
        notification_preference::Model {
            id: 1,
            user_id: 7,
            push_enabled: true,
            in_app_enabled: true,
            email_enabled: false,
            status_notifications: true,
            update_notifications: true,
            admin_message_notifications: true,
            system_announcement_notifications: true,
            quiet_hours_enabled: false,
            quiet_hours_start: None,
            quiet_hours_end: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn quiet(start: &str, end: &str) -> notification_preference::Model {
        let mut p = prefs();
        p.quiet_hours_enabled = true;
        p.quiet_hours_start = Some(start.to_string());
        p.quiet_hours_end = Some(end.to_string());
        p
    }

    #[test]
    fn test_priority_for_status() {
        assert_eq!(
            priority_for_status(RequestStatus::Completed),
            NotificationPriority::High
        );
        assert_eq!(
            priority_for_status(RequestStatus::Rejected),
            NotificationPriority::High
        );
        assert_eq!(
            priority_for_status(RequestStatus::InProgress),
            NotificationPriority::Normal
        );
        assert_eq!(
            priority_for_status(RequestStatus::Pending),
            NotificationPriority::Normal
        );
    }

    #[test]
    fn test_quiet_hours_same_day_window() {
        let p = quiet("13:00", "15:00");
        assert!(within_quiet_hours(&p, "13:00"));
        assert!(within_quiet_hours(&p, "14:30"));
        assert!(within_quiet_hours(&p, "15:00"));
        assert!(!within_quiet_hours(&p, "12:59"));
        assert!(!within_quiet_hours(&p, "15:01"));
    }

    #[test]
    fn test_quiet_hours_wrap_around_midnight() {
        let p = quiet("22:00", "06:00");
        assert!(within_quiet_hours(&p, "23:30"));
        assert!(within_quiet_hours(&p, "02:00"));
        assert!(within_quiet_hours(&p, "06:00"));
        assert!(!within_quiet_hours(&p, "12:00"));
        assert!(!within_quiet_hours(&p, "21:59"));
    }

    #[test]
    fn test_quiet_hours_disabled_or_malformed() {
        assert!(!within_quiet_hours(&prefs(), "23:30"));
        let p = quiet("not-a-time", "06:00");
        assert!(!within_quiet_hours(&p, "23:30"));
        let p = quiet("25:00", "06:00");
        assert!(!within_quiet_hours(&p, "23:30"));
    }

    #[test]
    fn test_push_suppressed_during_quiet_hours() {
        let p = quiet("22:00", "06:00");
        assert!(!push_eligible(&p, NotificationPriority::High, "23:30"));
        assert!(push_eligible(&p, NotificationPriority::High, "12:00"));
    }

    #[test]
    fn test_urgent_bypasses_quiet_hours_but_not_channel_toggle() {
        let mut p = quiet("22:00", "06:00");
        assert!(push_eligible(&p, NotificationPriority::Urgent, "23:30"));

        p.push_enabled = false;
        assert!(!push_eligible(&p, NotificationPriority::Urgent, "23:30"));
    }

    #[test]
    fn test_type_toggles() {
        let mut p = prefs();
        p.status_notifications = false;
        assert!(!type_enabled(
            &p,
            NotificationType::RequestStatusChanged,
            NotificationPriority::High
        ));
        assert!(type_enabled(
            &p,
            NotificationType::RequestCreated,
            NotificationPriority::Normal
        ));

        p.system_announcement_notifications = false;
        assert!(!type_enabled(
            &p,
            NotificationType::SystemAnnouncement,
            NotificationPriority::Normal
        ));
        // Urgent announcements bypass the toggle.
        assert!(type_enabled(
            &p,
            NotificationType::SystemAnnouncement,
            NotificationPriority::Urgent
        ));
    }

    fn stored_request(user_id: i32) -> cmsvs_db::entities::request::Model {
        cmsvs_db::entities::request::Model {
            id: 9,
            request_number: "REQ-20250614034524".into(),
            unique_code: "A1B2C3D4E5F6".into(),
            user_id,
            status: RequestStatus::Pending,
            is_archived: false,
            full_name: "Ahmed".into(),
            personal_number: "123456789".into(),
            phone_number: "33112233".into(),
            building_name: "B".into(),
            road_name: "R".into(),
            building_number: "12".into(),
            civil_defense_file_number: None,
            building_permit_number: None,
            licenses_section: true,
            fire_equipment_section: false,
            commercial_records_section: false,
            engineering_offices_section: false,
            hazardous_materials_section: false,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn admin(id: i32) -> user::Model {
        user::Model {
            id,
            username: format!("admin{id}"),
            email: format!("admin{id}@example.com"),
            full_name: format!("Admin {id}"),
            avatar_path: None,
            role: user::UserRole::Admin,
            password_hash: "hash".into(),
            is_active: true,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn persisted(id: i32, user_id: i32) -> notification::Model {
        notification::Model {
            id,
            user_id,
            notification_type: NotificationType::RequestCreated,
            priority: NotificationPriority::Normal,
            title: "New request REQ-20250614034524".into(),
            body: "Ahmed submitted request REQ-20250614034524".into(),
            action_url: Some("/requests/9".into()),
            request_id: Some(9),
            related_user_id: Some(7),
            is_read: false,
            is_sent: false,
            read_at: None,
            sent_at: None,
            extra_data: None,
            created_at: Utc::now().into(),
        }
    }

    fn engine(db: &Arc<sea_orm::DatabaseConnection>) -> NotificationEngine {
        NotificationEngine::new(Clock::new(3), NotificationRepository::new(db.clone()))
    }

    #[tokio::test]
    async fn test_fan_out_created_notifies_active_admins_except_owner() {
        // The owner (user 7) is an admin too and must not be notified about
        // their own submission.
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![admin(1), admin(7)]])
                .append_query_results([vec![prefs()]])
                .append_query_results([vec![persisted(41, 1)]])
                .into_connection(),
        );

        let event = LifecycleEvent::Created {
            request: stored_request(7),
        };
        let pending = engine(&db).fan_out(db.as_ref(), &event).await.unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].notification.user_id, 1);
        assert_eq!(
            pending[0].notification.notification_type,
            NotificationType::RequestCreated
        );
    }

    #[tokio::test]
    async fn test_fan_out_skips_recipient_with_updates_disabled() {
        // The only recipient turned update notices off: nothing is inserted,
        // which the mock enforces by staging no insert result.
        let mut disabled = prefs();
        disabled.update_notifications = false;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![admin(1)]])
                .append_query_results([vec![disabled]])
                .into_connection(),
        );

        let event = LifecycleEvent::Created {
            request: stored_request(7),
        };
        let pending = engine(&db).fan_out(db.as_ref(), &event).await.unwrap();

        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_persists_without_push_when_channel_disabled() {
        // push_enabled=false keeps the notification in-app only: the insert
        // still happens but nothing is returned for dispatch.
        let mut in_app_only = prefs();
        in_app_only.push_enabled = false;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![admin(1)]])
                .append_query_results([vec![in_app_only]])
                .append_query_results([vec![persisted(41, 1)]])
                .into_connection(),
        );

        let event = LifecycleEvent::Created {
            request: stored_request(7),
        };
        let pending = engine(&db).fan_out(db.as_ref(), &event).await.unwrap();

        assert!(pending.is_empty());
    }

    #[test]
    fn test_deleted_event_carries_no_request_link() {
        let request = cmsvs_db::entities::request::Model {
            id: 9,
            request_number: "REQ-20250614034524".into(),
            unique_code: "A1B2C3D4E5F6".into(),
            user_id: 7,
            status: RequestStatus::Completed,
            is_archived: false,
            full_name: "Ahmed".into(),
            personal_number: "123456789".into(),
            phone_number: "33112233".into(),
            building_name: "B".into(),
            road_name: "R".into(),
            building_number: "12".into(),
            civil_defense_file_number: None,
            building_permit_number: None,
            licenses_section: true,
            fire_equipment_section: false,
            commercial_records_section: false,
            engineering_offices_section: false,
            hazardous_materials_section: false,
            created_at: Utc::now().into(),
            updated_at: None,
        };
        let content = event_content(&LifecycleEvent::Deleted { request });
        assert_eq!(content.request_id, None);
        assert_eq!(content.action_url, None);
        assert_eq!(content.priority, NotificationPriority::High);
    }
}
