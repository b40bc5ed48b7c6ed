//! Domain error taxonomy
//!
//! Every public service operation returns [`DomainResult`]. Infrastructure
//! failures (database, Redis, HTTP adapters) collapse into
//! [`DomainError::Internal`] at the service boundary so that provider details
//! never leak to callers; the full chain is logged where the conversion
//! happens.
//!
//! # Example
//!
//! ```
//! use toq_shared::error::{DomainError, ErrorKind};
//!
//! let err = DomainError::validation("password", "at least 8 characters & special char");
//! assert_eq!(err.kind(), ErrorKind::Validation);
//! assert_eq!(err.kind().code(), 422);
//! ```

use serde::Serialize;
use thiserror::Error;

/// Result alias used by the service layer
pub type DomainResult<T> = Result<T, DomainError>;

/// Stable error categories exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimited,
    Locked,
    Internal,
}

impl ErrorKind {
    /// Stable numeric code for the category
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::Validation => 422,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::Locked => 423,
            ErrorKind::Internal => 500,
        }
    }

    /// Snake-case label (e.g. `not_found`)
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Locked => "locked",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Domain errors produced by the identity core
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Field-level validation failure
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// Credentials or token invalid. The message is always opaque.
    #[error("{0}")]
    Authentication(String),

    /// Role or status forbids the operation
    #[error("{0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    RateLimited(String),

    /// Account temporarily blocked (admin paths)
    #[error("{0}")]
    Locked(String),

    /// Infrastructure failure, message is already sanitized
    #[error("{0}")]
    Internal(String),

    #[error("no pending email change")]
    EmailChangeNotPending,
    #[error("invalid email change code")]
    EmailChangeCodeInvalid,
    #[error("email change code expired")]
    EmailChangeCodeExpired,

    #[error("no pending phone change")]
    PhoneChangeNotPending,
    #[error("invalid phone change code")]
    PhoneChangeCodeInvalid,
    #[error("phone change code expired")]
    PhoneChangeCodeExpired,

    #[error("no pending password change")]
    PasswordChangeNotPending,
    #[error("invalid password change code")]
    PasswordChangeCodeInvalid,
    #[error("password change code expired")]
    PasswordChangeCodeExpired,

    #[error("email already in use")]
    EmailAlreadyInUse,
    #[error("phone already in use")]
    PhoneAlreadyInUse,

    #[error("user has no active role")]
    ActiveRoleMissing,
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Opaque credential failure shared by every signin rejection path
    pub fn invalid_credentials() -> Self {
        DomainError::Authentication("invalid credentials".to_string())
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        DomainError::NotFound(entity.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DomainError::Conflict(message.into())
    }

    /// Maps an infrastructure error to an opaque internal error, logging the
    /// original so that operators keep the full chain.
    pub fn internal(source: impl std::fmt::Display) -> Self {
        tracing::error!(error = %source, "Infrastructure failure");
        DomainError::Internal("internal error".to_string())
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation { .. } => ErrorKind::Validation,
            DomainError::Authentication(_) => ErrorKind::Authentication,
            DomainError::Authorization(_) => ErrorKind::Authorization,
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::RateLimited(_) => ErrorKind::RateLimited,
            DomainError::Locked(_) => ErrorKind::Locked,
            DomainError::Internal(_) => ErrorKind::Internal,
            DomainError::EmailChangeNotPending
            | DomainError::PhoneChangeNotPending
            | DomainError::PasswordChangeNotPending
            | DomainError::EmailAlreadyInUse
            | DomainError::PhoneAlreadyInUse
            | DomainError::ActiveRoleMissing => ErrorKind::Conflict,
            DomainError::EmailChangeCodeInvalid
            | DomainError::EmailChangeCodeExpired
            | DomainError::PhoneChangeCodeInvalid
            | DomainError::PhoneChangeCodeExpired
            | DomainError::PasswordChangeCodeInvalid
            | DomainError::PasswordChangeCodeExpired => ErrorKind::Validation,
        }
    }

    /// Whether a signin transaction should still commit when this error is
    /// returned, so that the brute-force counter persists.
    pub fn commits_on_signin(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Authentication | ErrorKind::Authorization | ErrorKind::Locked
        )
    }

    /// Field/message pair for validation errors
    pub fn details(&self) -> Option<(String, String)> {
        match self {
            DomainError::Validation { field, message } => Some((field.clone(), message.clone())),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::not_found("record"),
            other => DomainError::internal(other),
        }
    }
}

impl From<redis::RedisError> for DomainError {
    fn from(err: redis::RedisError) -> Self {
        DomainError::internal(err)
    }
}

impl From<reqwest::Error> for DomainError {
    fn from(err: reqwest::Error) -> Self {
        DomainError::internal(err)
    }
}

impl From<crate::auth::jwt::JwtError> for DomainError {
    fn from(err: crate::auth::jwt::JwtError) -> Self {
        use crate::auth::jwt::JwtError;
        match err {
            JwtError::CreateError(_) => DomainError::internal(err),
            JwtError::Expired | JwtError::ValidationError(_) | JwtError::WrongType { .. } => {
                tracing::debug!(error = %err, "Token rejected");
                DomainError::Authentication("invalid token".to_string())
            }
        }
    }
}

impl From<crate::auth::password::PasswordError> for DomainError {
    fn from(err: crate::auth::password::PasswordError) -> Self {
        DomainError::internal(err)
    }
}

impl From<crate::blocklist::BlocklistError> for DomainError {
    fn from(err: crate::blocklist::BlocklistError) -> Self {
        DomainError::internal(err)
    }
}

impl From<validator::ValidationErrors> for DomainError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "invalid value".to_string());
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("payload".to_string(), "invalid payload".to_string()));
        DomainError::Validation { field, message }
    }
}
