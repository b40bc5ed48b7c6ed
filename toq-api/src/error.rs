/// Error handling for the API server
///
/// Handlers return `Result<T, ApiError>`. Domain errors convert through
/// their [`ErrorKind`]: the HTTP status is the kind's stable code and the
/// body is
///
/// ```json
/// { "code": 422, "error": "validation", "message": "...", "details": [...] }
/// ```
///
/// Internal errors are logged and answered with an opaque message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use toq_shared::error::{DomainError, ErrorKind};

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request (400)
    BadRequest(String),

    /// One of the identity core's error categories
    Domain {
        kind: ErrorKind,
        message: String,
        details: Option<Vec<ValidationErrorDetail>>,
    },

    /// Dependency down (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Numeric code, equal to the HTTP status
    pub code: u16,

    /// Category label (e.g. `not_found`)
    pub error: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Domain {
            kind: ErrorKind::Authentication,
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Domain {
            kind: ErrorKind::Authorization,
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Domain {
            kind: ErrorKind::NotFound,
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Domain {
            kind: ErrorKind::Internal,
            message: message.into(),
            details: None,
        }
    }

    fn parts(&self) -> (u16, &'static str) {
        match self {
            ApiError::BadRequest(_) => (400, "bad_request"),
            ApiError::Domain { kind, .. } => (kind.code(), kind.as_str()),
            ApiError::ServiceUnavailable(_) => (503, "service_unavailable"),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Domain { kind, message, .. } => write!(f, "{}: {}", kind.as_str(), message),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, error) = self.parts();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let (message, details) = match self {
            ApiError::Domain {
                kind: ErrorKind::Internal,
                message,
                ..
            } => {
                tracing::error!(error = %message, "Internal error");
                ("An internal error occurred".to_string(), None)
            }
            ApiError::Domain { message, details, .. } => (message, details),
            ApiError::BadRequest(message) | ApiError::ServiceUnavailable(message) => (message, None),
        };

        let body = Json(ErrorResponse {
            code,
            error: error.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let kind = err.kind();
        match err {
            DomainError::Validation { field, message } => ApiError::Domain {
                kind,
                message: "Request validation failed".to_string(),
                details: Some(vec![ValidationErrorDetail { field, message }]),
            },
            other => ApiError::Domain {
                kind,
                message: other.to_string(),
                details: None,
            },
        }
    }
}

impl From<toq_shared::repository::RepositoryError> for ApiError {
    fn from(err: toq_shared::repository::RepositoryError) -> Self {
        DomainError::from(err).into()
    }
}
