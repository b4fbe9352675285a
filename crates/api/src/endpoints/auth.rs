//! Session endpoints.

use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
use chrono::{DateTime, Utc};
use cmsvs_common::{AppError, AppResult};
use cmsvs_db::entities::user;
use cmsvs_db::repositories::UserRepository;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::extractors::AuthUser;
use crate::middleware::{AppState, SESSION_PREFIX, SESSION_TTL};
use crate::response::ApiResponse;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// User as exposed over the wire. The password hash never leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: user::UserRole,
    pub is_active: bool,
    pub created_at: String,
}

impl From<user::Model> for UserResponse {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            full_name: model.full_name,
            role: model.role,
            is_active: model.is_active,
            created_at: DateTime::<Utc>::from(model.created_at).to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

/// Verify credentials and issue a session token.
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<ApiResponse<LoginResponse>> {
    let user = state
        .user_repo
        .find_by_username(&req.username)
        .await?
        .filter(|u| u.is_active)
        .ok_or(AppError::Unauthorized)?;

    if !UserRepository::verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }

    let token = Uuid::new_v4().simple().to_string();
    state
        .cache
        .set(
            &format!("{SESSION_PREFIX}{token}"),
            json!(user.id),
            Some(SESSION_TTL),
        )
        .await?;

    tracing::info!(user_id = user.id, "User logged in");
    Ok(ApiResponse::ok(LoginResponse {
        token,
        user: user.into(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Revoke the presented session token.
async fn logout(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<ApiResponse<LogoutResponse>> {
    let token = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    state
        .cache
        .delete(&format!("{SESSION_PREFIX}{token}"))
        .await?;

    tracing::info!(user_id = user.id, "User logged out");
    Ok(ApiResponse::ok(LogoutResponse { logged_out: true }))
}

/// The authenticated user's own profile.
async fn me(AuthUser(user): AuthUser) -> AppResult<ApiResponse<UserResponse>> {
    Ok(ApiResponse::ok(user.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", post(me))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_uses_camel_case() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"username": "admin", "password": "secret"}"#).unwrap();
        assert_eq!(req.username, "admin");
        assert_eq!(req.password, "secret");
    }

    #[test]
    fn test_user_response_omits_password_hash() {
        let model = user::Model {
            id: 1,
            username: "admin".into(),
            email: "admin@example.com".into(),
            full_name: "Admin".into(),
            avatar_path: None,
            role: user::UserRole::Admin,
            password_hash: "argon2-hash".into(),
            is_active: true,
            created_at: "2026-01-15T08:00:00+03:00".parse().unwrap(),
            updated_at: None,
        };
        let encoded = serde_json::to_value(UserResponse::from(model)).unwrap();
        assert!(encoded.get("passwordHash").is_none());
        assert_eq!(encoded["role"], "Admin");
        assert_eq!(encoded["username"], "admin");
    }
}
