//! Account registration and token issuance.
//!
//! Passwords are stored as Argon2 PHC strings (algorithm, parameters and
//! salt travel with the hash). Tokens are random v4 UUIDs kept in memory,
//! so every token is invalidated by a restart. Each user holds at most one
//! live token: logging in again revokes the previous one.

use crate::error::AuthError;
use crate::storage::{self, RecordStore, UserRecord};
use crate::types::Identity;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;

/// Credentials submitted to `/api/register` and `/api/login`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Issued on successful registration or login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthToken {
    /// Bearer token for REST calls and `/ws?token=`.
    pub token: String,
    pub username: String,
}

pub struct AuthService {
    store: Arc<dyn RecordStore>,
    tokens: RwLock<HashMap<String, Identity>>,
}

impl AuthService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Creates an account and logs it in.
    pub fn register(&self, creds: &Credentials) -> Result<AuthToken, AuthError> {
        if !is_valid_username(&creds.username) {
            return Err(AuthError::InvalidUsername);
        }
        if creds.password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }

        let user = UserRecord {
            username: creds.username.clone(),
            password_hash: hash_password(&creds.password)?,
            created_at: storage::unix_timestamp(),
        };
        if !self.store.insert_user(user)? {
            return Err(AuthError::UsernameTaken);
        }

        log::info!("Registered user {}", creds.username);
        Ok(self.issue(&creds.username))
    }

    /// Checks credentials and issues a fresh token, revoking any older one.
    pub fn login(&self, creds: &Credentials) -> Result<AuthToken, AuthError> {
        if !is_valid_username(&creds.username) {
            return Err(AuthError::InvalidCredentials);
        }
        let user = self
            .store
            .get_user(&creds.username)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(&creds.password, &user.password_hash)? {
            log::warn!("Failed login for {}", creds.username);
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.issue(&user.username))
    }

    /// Resolves a token to the identity it was issued for.
    pub fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.read().get(token).cloned()
    }

    /// Revokes a token. Returns whether it was live.
    pub fn logout(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    fn issue(&self, username: &str) -> AuthToken {
        let token = Uuid::new_v4().to_string();
        let identity = Identity::new(username);
        let mut tokens = self.tokens.write();
        tokens.retain(|_, owner| *owner != identity);
        tokens.insert(token.clone(), identity);
        AuthToken {
            token,
            username: username.to_string(),
        }
    }
}

/// 3-32 characters drawn from ASCII letters, digits, `_` and `-`.
pub fn is_valid_username(name: &str) -> bool {
    (USERNAME_MIN..=USERNAME_MAX).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Hashes `password` into a PHC string with a fresh random salt.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored).map_err(|e| AuthError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
