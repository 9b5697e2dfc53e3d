//! Unified application error model and mapping helpers.
//! Authentication failures are recognized kinds that travel to the transport layer
//! untouched; anything unexpected is logged here and collapsed into a generic
//! transient error so persistence details never reach a caller.

use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    #[error("{message}")]
    DuplicateAccount { message: String },
    #[error("{message}")]
    InvalidCredentials { message: String },
    #[error("{message}")]
    AccountDeactivated { message: String },
    #[error("{message}")]
    InvalidSession { message: String },
    #[error("{message}")]
    Validation { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    PermissionDenied { message: String },
    #[error("{message}")]
    Transient { message: String },
}

impl AppError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::DuplicateAccount { .. } => "duplicate_account",
            AppError::InvalidCredentials { .. } => "invalid_credentials",
            AppError::AccountDeactivated { .. } => "account_deactivated",
            AppError::InvalidSession { .. } => "invalid_session",
            AppError::Validation { .. } => "validation_error",
            AppError::NotFound { .. } => "not_found",
            AppError::PermissionDenied { .. } => "permission_denied",
            AppError::Transient { .. } => "transient_server_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::DuplicateAccount { message }
            | AppError::InvalidCredentials { message }
            | AppError::AccountDeactivated { message }
            | AppError::InvalidSession { message }
            | AppError::Validation { message }
            | AppError::NotFound { message }
            | AppError::PermissionDenied { message }
            | AppError::Transient { message } => message.as_str(),
        }
    }

    pub fn duplicate_account() -> Self {
        AppError::DuplicateAccount { message: "User with this email already exists".into() }
    }

    /// Same kind and text for unknown email and wrong password.
    pub fn invalid_credentials() -> Self {
        AppError::InvalidCredentials { message: "Invalid credentials".into() }
    }

    pub fn account_deactivated() -> Self {
        AppError::AccountDeactivated { message: "Account is deactivated".into() }
    }

    pub fn invalid_session() -> Self {
        AppError::InvalidSession { message: "Invalid session".into() }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self { AppError::Validation { message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound { message: msg.into() } }
    pub fn permission_denied<S: Into<String>>(msg: S) -> Self { AppError::PermissionDenied { message: msg.into() } }

    /// Log the underlying failure with full detail and hand back only `public_msg`.
    pub fn transient<E: std::fmt::Display>(err: E, public_msg: &str) -> Self {
        error!(target: "auth", "{}: {}", public_msg, err);
        AppError::Transient { message: public_msg.to_string() }
    }

    /// True for the kinds that are re-raised as-is instead of being collapsed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AppError::DuplicateAccount { .. }
                | AppError::InvalidCredentials { .. }
                | AppError::AccountDeactivated { .. }
                | AppError::InvalidSession { .. }
        )
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::DuplicateAccount { .. } => 409,
            AppError::InvalidCredentials { .. } => 401,
            AppError::AccountDeactivated { .. } => 401,
            AppError::InvalidSession { .. } => 401,
            AppError::Validation { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::PermissionDenied { .. } => 403,
            AppError::Transient { .. } => 500,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::transient(err, "Internal server error")
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
