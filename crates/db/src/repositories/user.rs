//! User repository.

use std::sync::Arc;

use argon2::password_hash::{PasswordHasher, SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use cmsvs_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};

use crate::entities::{User, user};

/// User repository for database operations.
#[derive(Clone)]
pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a user by ID.
    pub async fn find_by_id(&self, id: i32) -> AppResult<Option<user::Model>> {
        Ok(User::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// Find a user by username.
    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<user::Model>> {
        Ok(User::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db.as_ref())
            .await?)
    }

    /// All active admins, the recipient set for request-created notices.
    pub async fn find_active_admins(&self) -> AppResult<Vec<user::Model>> {
        Ok(User::find()
            .filter(user::Column::Role.eq(user::UserRole::Admin))
            .filter(user::Column::IsActive.eq(true))
            .all(self.db.as_ref())
            .await?)
    }

    /// Create a new user.
    pub async fn create(&self, model: user::ActiveModel) -> AppResult<user::Model> {
        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Hash a password with Argon2.
    pub fn hash_password(password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AppError::Fatal(format!("password hashing failed: {e}")))
    }

    /// Verify a password against a stored hash.
    #[must_use]
    pub fn verify_password(password: &str, hash: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = UserRepository::hash_password("sturdy-passphrase").unwrap();
        assert!(UserRepository::verify_password("sturdy-passphrase", &hash));
        assert!(!UserRepository::verify_password("wrong", &hash));
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!UserRepository::verify_password("anything", "not-a-hash"));
    }
}
