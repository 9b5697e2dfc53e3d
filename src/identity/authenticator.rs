//! Session authenticator: register, login, validate and refresh on top of the
//! credential store and token issuer.
//!
//! All methods are blocking (password hashing is deliberately slow); async callers
//! should run them on the blocking pool.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::authorizer::ensure_super_admin;
use super::password::PasswordHasher;
use super::principal::Principal;
use super::store::{CredentialStore, StoreError};
use super::token::TokenIssuer;
use super::user::{NewUser, Profile, ProfileUpdate, Role, User, UserRecord};
use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

pub struct SessionAuthenticator {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenIssuer>,
    hasher: PasswordHasher,
}

impl SessionAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>, tokens: Arc<TokenIssuer>, hasher: PasswordHasher) -> Self {
        Self { store, tokens, hasher }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn register(&self, req: &RegisterRequest) -> AppResult<AuthResponse> {
        const FAILED: &str = "Failed to register user";
        if !is_valid_email(&req.email) {
            return Err(AppError::validation("email must be a valid email address"));
        }
        if req.name.trim().is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!("password must be at least {} characters", MIN_PASSWORD_LEN)));
        }
        match self.store.find_by_email(&req.email) {
            Ok(Some(_)) => return Err(AppError::duplicate_account()),
            Ok(None) => {}
            Err(e) => return Err(AppError::transient(e, FAILED)),
        }
        let password_hash = self.hasher.hash(&req.password).map_err(|e| AppError::transient(e, FAILED))?;
        let new = NewUser {
            email: req.email.clone(),
            name: req.name.trim().to_string(),
            password_hash,
            role: Role::User,
            profile: Profile { department: req.department.clone(), position: req.position.clone(), ..Default::default() },
        };
        let rec = match self.store.insert(new) {
            Ok(rec) => rec,
            // lost a race with a concurrent registration of the same address
            Err(StoreError::DuplicateEmail) => return Err(AppError::duplicate_account()),
            Err(e) => return Err(AppError::transient(e, FAILED)),
        };
        let pair = self.tokens.issue_pair(&rec).map_err(|e| AppError::transient(e, FAILED))?;
        info!(target: "auth", user_id = %rec.id, "user registered");
        Ok(AuthResponse { user: User::from(&rec), access_token: pair.access_token, refresh_token: pair.refresh_token })
    }

    pub fn login(&self, req: &LoginRequest) -> AppResult<AuthResponse> {
        const FAILED: &str = "Failed to login";
        let rec = match self.store.find_by_email(&req.email) {
            Ok(Some(rec)) => rec,
            Ok(None) => {
                self.hasher.verify_dummy(&req.password);
                return Err(AppError::invalid_credentials());
            }
            Err(e) => return Err(AppError::transient(e, FAILED)),
        };
        if !self.hasher.verify(&rec.password_hash, &req.password) {
            return Err(AppError::invalid_credentials());
        }
        if !rec.active {
            warn!(target: "auth", user_id = %rec.id, "login refused for deactivated account");
            return Err(AppError::account_deactivated());
        }
        let pair = self.tokens.issue_pair(&rec).map_err(|e| AppError::transient(e, FAILED))?;
        info!(target: "auth", user_id = %rec.id, "user logged in");
        Ok(AuthResponse { user: User::from(&rec), access_token: pair.access_token, refresh_token: pair.refresh_token })
    }

    /// Resolve the current user for a verified subject; `None` means anonymous.
    pub fn validate(&self, user_id: &str) -> Option<User> {
        match self.store.find_by_id(user_id) {
            Ok(Some(rec)) if rec.active => Some(User::from(&rec)),
            Ok(_) => None,
            Err(e) => {
                warn!(target: "auth", user_id = %user_id, "user validation failed: {}", e);
                None
            }
        }
    }

    /// Active status is re-read on every call, which is how deactivation reaches
    /// sessions that were issued before it.
    pub fn refresh(&self, user_id: &str) -> AppResult<RefreshResponse> {
        const FAILED: &str = "Failed to refresh token";
        let rec = self.active_record(user_id, FAILED)?;
        let access_token = self.tokens.issue(&rec.id, &rec.email, rec.role).map_err(|e| AppError::transient(e, FAILED))?;
        Ok(RefreshResponse { access_token })
    }

    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> AppResult<User> {
        const FAILED: &str = "Failed to update profile";
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::validation("name must not be empty"));
        }
        self.active_record(user_id, FAILED)?;
        match self.store.update_profile(user_id, update) {
            Ok(Some(rec)) => Ok(User::from(&rec)),
            Ok(None) => Err(AppError::invalid_session()),
            Err(e) => Err(AppError::transient(e, FAILED)),
        }
    }

    pub fn change_password(&self, user_id: &str, req: &ChangePasswordRequest) -> AppResult<()> {
        const FAILED: &str = "Failed to change password";
        if req.new_password != req.confirm_password {
            return Err(AppError::validation("password confirmation does not match"));
        }
        if req.new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!("password must be at least {} characters", MIN_PASSWORD_LEN)));
        }
        let rec = self.active_record(user_id, FAILED)?;
        if !self.hasher.verify(&rec.password_hash, &req.current_password) {
            return Err(AppError::invalid_credentials());
        }
        let hash = self.hasher.hash(&req.new_password).map_err(|e| AppError::transient(e, FAILED))?;
        match self.store.set_password_hash(user_id, &hash) {
            Ok(Some(_)) => {
                info!(target: "auth", user_id = %user_id, "password changed");
                Ok(())
            }
            Ok(None) => Err(AppError::invalid_session()),
            Err(e) => Err(AppError::transient(e, FAILED)),
        }
    }

    pub fn set_active(&self, actor: &Principal, user_id: &str, active: bool) -> AppResult<User> {
        ensure_super_admin(actor)?;
        match self.store.set_active(user_id, active) {
            Ok(Some(rec)) => {
                info!(target: "auth", actor = %actor.subject, user_id = %user_id, active, "account status changed");
                Ok(User::from(&rec))
            }
            Ok(None) => Err(AppError::not_found(format!("User {} not found", user_id))),
            Err(e) => Err(AppError::transient(e, "Failed to update account status")),
        }
    }

    /// Create the bootstrap SUPER_ADMIN if the address is not registered yet.
    pub fn ensure_admin(&self, email: &str, password: &str) -> anyhow::Result<()> {
        if self.store.find_by_email(email)?.is_some() {
            return Ok(());
        }
        let new = NewUser {
            email: email.to_string(),
            name: "Administrator".to_string(),
            password_hash: self.hasher.hash(password)?,
            role: Role::SuperAdmin,
            profile: Profile::default(),
        };
        match self.store.insert(new) {
            Ok(rec) => {
                info!(target: "startup", user_id = %rec.id, "bootstrap administrator created");
                Ok(())
            }
            Err(StoreError::DuplicateEmail) => Ok(()),
            Err(StoreError::Backend(e)) => Err(e),
        }
    }

    fn active_record(&self, user_id: &str, failed: &str) -> AppResult<UserRecord> {
        match self.store.find_by_id(user_id) {
            Ok(Some(rec)) if rec.active => Ok(rec),
            Ok(_) => Err(AppError::invalid_session()),
            Err(e) => Err(AppError::transient(e, failed)),
        }
    }
}

#[cfg(test)]
#[path = "authenticator_tests.rs"]
mod authenticator_tests;
