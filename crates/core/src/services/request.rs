//! Request lifecycle service.
//!
//! All mutations run inside one transaction that takes a row-level lock on
//! the request, applies the change, and persists the notification fan-out.
//! Push deliveries are dispatched after commit; cached listings are
//! invalidated on every write.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cmsvs_common::{AppError, AppResult, CacheManager, Clock};
use cmsvs_db::entities::request::{self, RequestStatus};
use cmsvs_db::entities::{Request, user};
use cmsvs_db::repositories::{FileRepository, NotificationRepository, RequestFilter, RequestRepository};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, NotSet, Set, TransactionError,
    TransactionTrait,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::services::events::LifecycleEvent;
use crate::services::notification::NotificationEngine;

/// Cache namespace for request listings.
const LIST_CACHE_PREFIX: &str = "requests";

/// Identifier generation retries before giving up.
const MINT_ATTEMPTS: u32 = 3;

static PERSONAL_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    Regex::new("^[0-9]{9}$").unwrap()
});

/// The user performing an operation, as resolved by the boundary.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: i32,
    pub is_admin: bool,
}

impl From<&user::Model> for Actor {
    fn from(user: &user::Model) -> Self {
        Self {
            id: user.id,
            is_admin: user.is_admin(),
        }
    }
}

/// Payload for creating a request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRequestInput {
    pub user_id: i32,

    #[validate(length(min = 1, max = 255, message = "required, at most 255 characters"))]
    pub full_name: String,

    #[validate(regex(path = *PERSONAL_NUMBER_RE, message = "must be exactly 9 digits"))]
    pub personal_number: String,

    #[validate(length(min = 1, max = 32, message = "required, at most 32 characters"))]
    pub phone_number: String,

    #[validate(length(min = 1, max = 255, message = "required, at most 255 characters"))]
    pub building_name: String,

    #[validate(length(min = 1, max = 255, message = "required, at most 255 characters"))]
    pub road_name: String,

    #[validate(length(min = 1, max = 64, message = "required, at most 64 characters"))]
    pub building_number: String,

    #[validate(length(max = 64, message = "at most 64 characters"))]
    pub civil_defense_file_number: Option<String>,

    #[validate(length(max = 64, message = "at most 64 characters"))]
    pub building_permit_number: Option<String>,

    #[serde(default)]
    pub licenses_section: bool,
    #[serde(default)]
    pub fire_equipment_section: bool,
    #[serde(default)]
    pub commercial_records_section: bool,
    #[serde(default)]
    pub engineering_offices_section: bool,
    #[serde(default)]
    pub hazardous_materials_section: bool,
}

impl CreateRequestInput {
    /// At least one section flag must be set.
    #[must_use]
    pub const fn any_section(&self) -> bool {
        self.licenses_section
            || self.fire_equipment_section
            || self.commercial_records_section
            || self.engineering_offices_section
            || self.hazardous_materials_section
    }
}

/// Payload for editing request details. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateDetailsInput {
    #[validate(length(min = 1, max = 32, message = "at most 32 characters"))]
    pub phone_number: Option<String>,

    #[validate(length(min = 1, max = 255, message = "at most 255 characters"))]
    pub building_name: Option<String>,

    #[validate(length(min = 1, max = 255, message = "at most 255 characters"))]
    pub road_name: Option<String>,

    #[validate(length(min = 1, max = 64, message = "at most 64 characters"))]
    pub building_number: Option<String>,

    #[validate(length(max = 64, message = "at most 64 characters"))]
    pub civil_defense_file_number: Option<String>,

    #[validate(length(max = 64, message = "at most 64 characters"))]
    pub building_permit_number: Option<String>,
}

/// Request lifecycle service.
#[derive(Clone)]
pub struct RequestService {
    db: Arc<DatabaseConnection>,
    request_repo: RequestRepository,
    clock: Clock,
    engine: NotificationEngine,
    cache: Arc<CacheManager>,
}

impl RequestService {
    /// Create a new request service.
    #[must_use]
    pub fn new(
        db: Arc<DatabaseConnection>,
        request_repo: RequestRepository,
        clock: Clock,
        engine: NotificationEngine,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self {
            db,
            request_repo,
            clock,
            engine,
            cache,
        }
    }

    /// Create a request in `pending` and notify the admins.
    ///
    /// Request number and unique code are re-minted on collision, up to
    /// three attempts.
    pub async fn create(&self, input: CreateRequestInput) -> AppResult<request::Model> {
        input.validate()?;
        if !input.any_section() {
            return Err(AppError::validation(
                "sections",
                "at least one section must be selected",
            ));
        }

        for attempt in 1..=MINT_ATTEMPTS {
            let request_number = format!("REQ-{}", self.clock.timestamp_for_request_number());
            let unique_code = mint_unique_code();

            if self.request_repo.number_exists(&request_number).await?
                || self.request_repo.code_exists(&unique_code).await?
            {
                warn!(
                    request_number = %request_number,
                    attempt,
                    "Request identifier collision, re-minting"
                );
                // Numbers have second precision, so wait out the second.
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let now = self.clock.now();
            let model = request::ActiveModel {
                id: NotSet,
                request_number: Set(request_number.clone()),
                unique_code: Set(unique_code),
                user_id: Set(input.user_id),
                status: Set(RequestStatus::Pending),
                is_archived: Set(false),
                full_name: Set(input.full_name.clone()),
                personal_number: Set(input.personal_number.clone()),
                phone_number: Set(input.phone_number.clone()),
                building_name: Set(input.building_name.clone()),
                road_name: Set(input.road_name.clone()),
                building_number: Set(input.building_number.clone()),
                civil_defense_file_number: Set(input.civil_defense_file_number.clone()),
                building_permit_number: Set(input.building_permit_number.clone()),
                licenses_section: Set(input.licenses_section),
                fire_equipment_section: Set(input.fire_equipment_section),
                commercial_records_section: Set(input.commercial_records_section),
                engineering_offices_section: Set(input.engineering_offices_section),
                hazardous_materials_section: Set(input.hazardous_materials_section),
                created_at: Set(now.into()),
                updated_at: Set(None),
            };

            let engine = self.engine.clone();
            let result = self
                .db
                .transaction(move |txn| {
                    Box::pin(async move {
                        let created = model.insert(txn).await?;
                        let pending = engine
                            .fan_out(txn, &LifecycleEvent::Created {
                                request: created.clone(),
                            })
                            .await?;
                        Ok((created, pending))
                    })
                })
                .await
                .map_err(flatten_txn);

            match result {
                Ok((created, pending)) => {
                    info!(
                        request_id = created.id,
                        request_number = %created.request_number,
                        "Created request"
                    );
                    self.engine.dispatch_pushes(pending).await;
                    self.invalidate_listings().await;
                    return Ok(created);
                }
                // A racing creation won the unique index; re-mint.
                Err(AppError::Conflict(reason)) if attempt < MINT_ATTEMPTS => {
                    warn!(reason = %reason, attempt, "Request insert conflicted, re-minting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::IdentifierExhausted(
            "request number and unique code generation failed after 3 attempts".to_string(),
        ))
    }

    /// Move a request to a new status.
    pub async fn update_status(
        &self,
        request_id: i32,
        new_status: RequestStatus,
        actor: Actor,
    ) -> AppResult<request::Model> {
        let engine = self.engine.clone();
        let now = self.clock.now();

        let (updated, pending) = self
            .db
            .transaction(move |txn| {
                Box::pin(async move {
                    let current = RequestRepository::find_for_update(txn, request_id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

                    let old = current.status;
                    check_transition(old, new_status, actor, current.user_id)?;

                    let active = transition_active_model(current, new_status, now);
                    let updated = active.update(txn).await?;

                    let pending = engine
                        .fan_out(txn, &LifecycleEvent::StatusChanged {
                            request: updated.clone(),
                            old,
                            new: new_status,
                        })
                        .await?;
                    Ok((updated, pending))
                })
            })
            .await
            .map_err(flatten_txn)?;

        info!(
            request_id,
            new_status = ?new_status,
            actor_id = actor.id,
            "Request status changed"
        );
        self.engine.dispatch_pushes(pending).await;
        self.invalidate_listings().await;
        Ok(updated)
    }

    /// Edit the mutable detail fields of a request.
    pub async fn update_details(
        &self,
        request_id: i32,
        input: UpdateDetailsInput,
        actor: Actor,
    ) -> AppResult<request::Model> {
        input.validate()?;
        let engine = self.engine.clone();
        let now = self.clock.now();

        let (updated, pending) = self
            .db
            .transaction(move |txn| {
                Box::pin(async move {
                    let current = RequestRepository::find_for_update(txn, request_id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

                    if !actor.is_admin && actor.id != current.user_id {
                        return Err(AppError::Forbidden(
                            "only the owner or an admin may edit a request".to_string(),
                        ));
                    }

                    let mut active: request::ActiveModel = current.into();
                    if let Some(v) = input.phone_number {
                        active.phone_number = Set(v);
                    }
                    if let Some(v) = input.building_name {
                        active.building_name = Set(v);
                    }
                    if let Some(v) = input.road_name {
                        active.road_name = Set(v);
                    }
                    if let Some(v) = input.building_number {
                        active.building_number = Set(v);
                    }
                    if let Some(v) = input.civil_defense_file_number {
                        active.civil_defense_file_number = Set(Some(v));
                    }
                    if let Some(v) = input.building_permit_number {
                        active.building_permit_number = Set(Some(v));
                    }
                    active.updated_at = Set(Some(now.into()));
                    let updated = active.update(txn).await?;

                    let pending = engine
                        .fan_out(txn, &LifecycleEvent::Updated {
                            request: updated.clone(),
                        })
                        .await?;
                    Ok((updated, pending))
                })
            })
            .await
            .map_err(flatten_txn)?;

        self.engine.dispatch_pushes(pending).await;
        self.invalidate_listings().await;
        Ok(updated)
    }

    /// Set or clear the archival flag. Admin only; terminal statuses only.
    pub async fn set_archived(
        &self,
        request_id: i32,
        archived: bool,
        actor: Actor,
    ) -> AppResult<request::Model> {
        if !actor.is_admin {
            return Err(AppError::Forbidden(
                "only admins may archive requests".to_string(),
            ));
        }

        let engine = self.engine.clone();
        let now = self.clock.now();

        let (updated, pending) = self
            .db
            .transaction(move |txn| {
                Box::pin(async move {
                    let current = RequestRepository::find_for_update(txn, request_id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

                    if !current.status.is_terminal() {
                        return Err(AppError::InvalidTransition(format!(
                            "cannot change archival of a {:?} request",
                            current.status
                        )));
                    }
                    if current.is_archived == archived {
                        return Ok((current, Vec::new()));
                    }

                    let mut active: request::ActiveModel = current.into();
                    active.is_archived = Set(archived);
                    active.updated_at = Set(Some(now.into()));
                    let updated = active.update(txn).await?;

                    let pending = engine
                        .fan_out(txn, &LifecycleEvent::Archived {
                            request: updated.clone(),
                            archived,
                        })
                        .await?;
                    Ok((updated, pending))
                })
            })
            .await
            .map_err(flatten_txn)?;

        self.engine.dispatch_pushes(pending).await;
        self.invalidate_listings().await;
        Ok(updated)
    }

    /// Delete a request. Admin only.
    ///
    /// File records cascade; notification links are nulled for audit; the
    /// owner gets a high-priority deletion notice. Returns the stored paths
    /// of the removed attachments so the caller can clear the disk.
    pub async fn delete(&self, request_id: i32, actor: Actor) -> AppResult<Vec<String>> {
        if !actor.is_admin {
            return Err(AppError::Forbidden(
                "only admins may delete requests".to_string(),
            ));
        }

        let engine = self.engine.clone();

        let (paths, pending) = self
            .db
            .transaction(move |txn| {
                Box::pin(async move {
                    let current = RequestRepository::find_for_update(txn, request_id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

                    let files = FileRepository::find_by_request_in(txn, request_id).await?;
                    let paths: Vec<String> = files.into_iter().map(|f| f.file_path).collect();

                    FileRepository::delete_by_request(txn, request_id).await?;
                    NotificationRepository::null_request_links(txn, request_id).await?;

                    let pending = engine
                        .fan_out(txn, &LifecycleEvent::Deleted {
                            request: current.clone(),
                        })
                        .await?;

                    Request::delete_by_id(request_id).exec(txn).await?;
                    Ok((paths, pending))
                })
            })
            .await
            .map_err(flatten_txn)?;

        info!(request_id, actor_id = actor.id, "Deleted request");
        self.engine.dispatch_pushes(pending).await;
        self.invalidate_listings().await;
        Ok(paths)
    }

    /// Fetch one request. Owners see their own; admins see all.
    pub async fn get(&self, request_id: i32, actor: Actor) -> AppResult<request::Model> {
        let model = self
            .request_repo
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

        if !actor.is_admin && actor.id != model.user_id {
            return Err(AppError::Forbidden(
                "request belongs to another user".to_string(),
            ));
        }
        Ok(model)
    }

    /// List requests. Non-admins are restricted to their own.
    ///
    /// Results are cached; every write path invalidates the namespace.
    pub async fn list(
        &self,
        mut filter: RequestFilter,
        actor: Actor,
    ) -> AppResult<Vec<request::Model>> {
        if !actor.is_admin {
            filter.user_id = Some(actor.id);
        }

        let key = listing_cache_key(&filter);
        if let Some(cached) = self.cache.get(&key).await? {
            if let Ok(models) = serde_json::from_value::<Vec<request::Model>>(cached) {
                return Ok(models);
            }
        }

        let models = self.request_repo.list(&filter).await?;
        if let Ok(value) = serde_json::to_value(&models) {
            self.cache.set(&key, value, None).await?;
        }
        Ok(models)
    }

    async fn invalidate_listings(&self) {
        if let Err(e) = self
            .cache
            .delete_prefix(&format!("{LIST_CACHE_PREFIX}:"))
            .await
        {
            warn!(error = %e, "Failed to invalidate request listing cache");
        }
    }
}

/// 12 uppercase hex characters from a fresh v4 UUID.
fn mint_unique_code() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()[..12].to_string()
}

fn listing_cache_key(filter: &RequestFilter) -> String {
    let mut kwargs = BTreeMap::new();
    kwargs.insert("user_id".to_string(), serde_json::json!(filter.user_id));
    kwargs.insert("status".to_string(), serde_json::json!(filter.status));
    kwargs.insert(
        "is_archived".to_string(),
        serde_json::json!(filter.is_archived),
    );
    kwargs.insert("limit".to_string(), serde_json::json!(filter.limit));
    kwargs.insert("offset".to_string(), serde_json::json!(filter.offset));
    format!(
        "{LIST_CACHE_PREFIX}:list:{}",
        CacheManager::argument_hash(&[], &kwargs)
    )
}

/// Apply a validated transition to the row.
///
/// Moving to a non-terminal status also clears the archival flag: only
/// completed or rejected requests may stay archived, so a reopened request
/// must come back into the default listings.
fn transition_active_model(
    current: request::Model,
    new_status: RequestStatus,
    now: DateTime<Utc>,
) -> request::ActiveModel {
    let mut active: request::ActiveModel = current.into();
    active.status = Set(new_status);
    if !new_status.is_terminal() {
        active.is_archived = Set(false);
    }
    active.updated_at = Set(Some(now.into()));
    active
}

fn flatten_txn(e: TransactionError<AppError>) -> AppError {
    match e {
        TransactionError::Connection(db) => db.into(),
        TransactionError::Transaction(app) => app,
    }
}

/// Validate a status transition for the given actor.
///
/// `pending → in_progress` is open to the owner and admins; every other
/// edge, including reopening a terminal request, is admin only.
pub fn check_transition(
    old: RequestStatus,
    new: RequestStatus,
    actor: Actor,
    owner_id: i32,
) -> AppResult<()> {
    use RequestStatus::{Completed, InProgress, Pending, Rejected};

    if old == new {
        return Err(AppError::InvalidTransition(format!(
            "request is already {new:?}"
        )));
    }

    let allowed_for = match (old, new) {
        (Pending, InProgress) => actor.is_admin || actor.id == owner_id,
        (Pending | InProgress, Completed | Rejected)
        | (InProgress, Pending)
        | (Completed | Rejected, InProgress) => actor.is_admin,
        _ => {
            return Err(AppError::InvalidTransition(format!(
                "{old:?} -> {new:?} is not a valid transition"
            )));
        }
    };

    if allowed_for {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{old:?} -> {new:?} requires admin rights"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const OWNER: Actor = Actor {
        id: 7,
        is_admin: false,
    };
    const ADMIN: Actor = Actor {
        id: 1,
        is_admin: true,
    };
    const STRANGER: Actor = Actor {
        id: 99,
        is_admin: false,
    };

    fn input() -> CreateRequestInput {
        CreateRequestInput {
            user_id: 7,
            full_name: "Ahmed Al-Sayed".into(),
            personal_number: "123456789".into(),
            phone_number: "33112233".into(),
            building_name: "Manama Tower".into(),
            road_name: "Road 2409".into(),
            building_number: "1204".into(),
            civil_defense_file_number: None,
            building_permit_number: None,
            licenses_section: true,
            fire_equipment_section: false,
            commercial_records_section: false,
            engineering_offices_section: false,
            hazardous_materials_section: false,
        }
    }

    fn stored(status: RequestStatus, is_archived: bool) -> request::Model {
        request::Model {
            id: 1,
            request_number: "REQ-20260115120000".into(),
            unique_code: "A1B2C3D4E5F6".into(),
            user_id: 7,
            status,
            is_archived,
            full_name: "Ahmed Al-Sayed".into(),
            personal_number: "123456789".into(),
            phone_number: "33112233".into(),
            building_name: "Manama Tower".into(),
            road_name: "Road 2409".into(),
            building_number: "1204".into(),
            civil_defense_file_number: None,
            building_permit_number: None,
            licenses_section: true,
            fire_equipment_section: false,
            commercial_records_section: false,
            engineering_offices_section: false,
            hazardous_materials_section: false,
            created_at: "2026-01-15T12:00:00+03:00".parse().unwrap(),
            updated_at: None,
        }
    }

    #[test]
    fn test_reopening_clears_archival_flag() {
        let archived = stored(RequestStatus::Completed, true);
        let active = transition_active_model(archived, RequestStatus::InProgress, Utc::now());
        assert_eq!(active.status, Set(RequestStatus::InProgress));
        assert_eq!(active.is_archived, Set(false));
    }

    #[test]
    fn test_terminal_transition_leaves_archival_untouched() {
        let open = stored(RequestStatus::InProgress, false);
        let active = transition_active_model(open, RequestStatus::Completed, Utc::now());
        assert_eq!(active.status, Set(RequestStatus::Completed));
        assert!(matches!(
            active.is_archived,
            sea_orm::ActiveValue::Unchanged(false)
        ));
    }

    #[test]
    fn test_owner_may_start_progress_only() {
        use RequestStatus::{Completed, InProgress, Pending, Rejected};

        assert!(check_transition(Pending, InProgress, OWNER, 7).is_ok());
        assert!(check_transition(Pending, InProgress, ADMIN, 7).is_ok());
        assert!(matches!(
            check_transition(Pending, InProgress, STRANGER, 7),
            Err(AppError::Forbidden(_))
        ));

        assert!(matches!(
            check_transition(Pending, Completed, OWNER, 7),
            Err(AppError::Forbidden(_))
        ));
        assert!(check_transition(Pending, Completed, ADMIN, 7).is_ok());
        assert!(check_transition(InProgress, Rejected, ADMIN, 7).is_ok());
    }

    #[test]
    fn test_reopen_and_send_back_are_admin_only() {
        use RequestStatus::{Completed, InProgress, Pending, Rejected};

        assert!(check_transition(InProgress, Pending, ADMIN, 7).is_ok());
        assert!(matches!(
            check_transition(InProgress, Pending, OWNER, 7),
            Err(AppError::Forbidden(_))
        ));

        assert!(check_transition(Completed, InProgress, ADMIN, 7).is_ok());
        assert!(check_transition(Rejected, InProgress, ADMIN, 7).is_ok());
        assert!(matches!(
            check_transition(Completed, InProgress, OWNER, 7),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_invalid_edges_rejected_regardless_of_role() {
        use RequestStatus::{Completed, Pending, Rejected};

        assert!(matches!(
            check_transition(Completed, Pending, ADMIN, 7),
            Err(AppError::InvalidTransition(_))
        ));
        assert!(matches!(
            check_transition(Completed, Rejected, ADMIN, 7),
            Err(AppError::InvalidTransition(_))
        ));
        assert!(matches!(
            check_transition(Pending, Pending, ADMIN, 7),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_unique_code_shape() {
        let code = mint_unique_code();
        assert_eq!(code.len(), 12);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_ne!(code, mint_unique_code());
    }

    #[test]
    fn test_create_input_validation() {
        assert!(input().validate().is_ok());

        let mut bad = input();
        bad.personal_number = "12345".into();
        let errors = bad.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("personal_number"));

        let mut no_sections = input();
        no_sections.licenses_section = false;
        assert!(!no_sections.any_section());
    }

    #[test]
    fn test_listing_cache_key_is_stable() {
        let a = RequestFilter {
            user_id: Some(7),
            status: Some(RequestStatus::Pending),
            is_archived: Some(false),
            limit: 50,
            offset: 0,
        };
        let b = a.clone();
        assert_eq!(listing_cache_key(&a), listing_cache_key(&b));

        let mut c = a.clone();
        c.offset = 50;
        assert_ne!(listing_cache_key(&a), listing_cache_key(&c));
    }
}
