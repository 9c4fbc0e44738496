//! Error types for Ares.
//!
//! [`AresError`] is the error type handlers return on the HTTP side. Each
//! variant belongs to an [`ErrorCategory`], which fixes both the HTTP status
//! code and the RPC [`Code`] used when the same failure crosses the RPC
//! transport.
//!
//! | `ErrorCategory` | HTTP | RPC |
//! |---|---|---|
//! | `Validation` | 400 | `InvalidArgument` |
//! | `Authentication` | 401 | `Unauthenticated` |
//! | `Authorization` | 403 | `PermissionDenied` |
//! | `NotFound` | 404 | `NotFound` |
//! | `MethodNotAllowed` | 405 | `Unimplemented` |
//! | `Conflict` | 409 | `Aborted` |
//! | `RateLimited` | 429 | `ResourceExhausted` |
//! | `Internal` | 500 | `Internal` |
//! | `Unavailable` | 503 | `Unavailable` |
//! | `Timeout` | 504 | `DeadlineExceeded` |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::Code;

/// Result type alias using [`AresError`].
pub type AresResult<T> = Result<T, AresError>;

/// Categories of errors for classification and handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request validation errors (invalid input, malformed body).
    Validation,
    /// Authentication errors (invalid/missing credentials).
    Authentication,
    /// Authorization errors (permission denied).
    Authorization,
    /// Resource not found.
    NotFound,
    /// The path exists but not for this method.
    MethodNotAllowed,
    /// Conflict (e.g., concurrent modification).
    Conflict,
    /// Rate limiting.
    RateLimited,
    /// Internal server errors.
    Internal,
    /// A dependency or the server itself is not accepting work.
    Unavailable,
    /// Request timeout.
    Timeout,
}

impl ErrorCategory {
    /// Returns the HTTP status code for this category.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Returns the RPC status code for this category.
    #[must_use]
    pub const fn rpc_code(&self) -> Code {
        match self {
            Self::Validation => Code::InvalidArgument,
            Self::Authentication => Code::Unauthenticated,
            Self::Authorization => Code::PermissionDenied,
            Self::NotFound => Code::NotFound,
            Self::MethodNotAllowed => Code::Unimplemented,
            Self::Conflict => Code::Aborted,
            Self::RateLimited => Code::ResourceExhausted,
            Self::Internal => Code::Internal,
            Self::Unavailable => Code::Unavailable,
            Self::Timeout => Code::DeadlineExceeded,
        }
    }

    /// Returns the machine-readable code used in error envelopes.
    #[must_use]
    pub const fn as_code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization => "AUTHORIZATION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unavailable => "UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
        }
    }
}

/// Standard error type for HTTP handlers.
///
/// # Example
///
/// ```
/// use ares_core::{AresError, ErrorCategory};
///
/// fn validate(name: &str) -> Result<(), AresError> {
///     if name.is_empty() {
///         return Err(AresError::validation("name cannot be empty"));
///     }
///     Ok(())
/// }
///
/// let err = validate("").unwrap_err();
/// assert_eq!(err.category(), ErrorCategory::Validation);
/// ```
#[derive(Error, Debug)]
pub enum AresError {
    /// Request validation failed.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// Authorization denied.
    #[error("authorization denied: {message}")]
    Authorization {
        /// Human-readable error message.
        message: String,
    },

    /// Resource not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Method not allowed on an existing path.
    #[error("method not allowed: {method}")]
    MethodNotAllowed {
        /// The rejected method.
        method: String,
        /// Methods the path does accept.
        allowed: Vec<String>,
    },

    /// Conflict error.
    #[error("conflict: {message}")]
    Conflict {
        /// Human-readable error message.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Human-readable error message.
        message: String,
    },

    /// Internal server error.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Service unavailable.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Human-readable error message.
        message: String,
    },

    /// Request timeout.
    #[error("timeout: {message}")]
    Timeout {
        /// Human-readable error message.
        message: String,
    },
}

impl AresError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates an authorization error.
    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a method-not-allowed error listing the accepted methods.
    #[must_use]
    pub fn method_not_allowed(method: impl Into<String>, allowed: Vec<String>) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
            allowed,
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a rate limited error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Authorization { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::MethodNotAllowed { .. } => ErrorCategory::MethodNotAllowed,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Internal { .. } => ErrorCategory::Internal,
            Self::Unavailable { .. } => ErrorCategory::Unavailable,
            Self::Timeout { .. } => ErrorCategory::Timeout,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().status_code()
    }

    /// Returns the message shown to clients.
    ///
    /// Internal errors never leak their source.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { message }
            | Self::Authentication { message }
            | Self::Authorization { message }
            | Self::NotFound { message }
            | Self::Conflict { message }
            | Self::RateLimited { message }
            | Self::Internal { message, .. }
            | Self::Unavailable { message }
            | Self::Timeout { message } => message.clone(),
            Self::MethodNotAllowed { method, .. } => format!("method {method} not allowed"),
        }
    }

    /// Converts this error to a serializable error envelope.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        let category = self.category();
        ErrorEnvelope {
            error: ErrorDetail {
                code: category.as_code().to_string(),
                message: self.public_message(),
                category,
                request_id: request_id.map(ToString::to_string),
            },
        }
    }
}

/// Serializable error envelope for HTTP responses.
///
/// Renders as `{"error": {"code", "message", "category", "request_id"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
}

/// Error detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Error category.
    pub category: ErrorCategory,
    /// The request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorCategory; 10] = [
        ErrorCategory::Validation,
        ErrorCategory::Authentication,
        ErrorCategory::Authorization,
        ErrorCategory::NotFound,
        ErrorCategory::MethodNotAllowed,
        ErrorCategory::Conflict,
        ErrorCategory::RateLimited,
        ErrorCategory::Internal,
        ErrorCategory::Unavailable,
        ErrorCategory::Timeout,
    ];

    #[test]
    fn test_validation_error() {
        let error = AresError::validation("invalid email format");
        assert_eq!(error.category(), ErrorCategory::Validation);
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(error.to_string().contains("invalid email format"));
    }

    #[test]
    fn test_rate_limited_maps_to_429_and_resource_exhausted() {
        let error = AresError::rate_limited("slow down");
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.category().rpc_code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_internal_source_is_not_exposed() {
        let source = std::io::Error::other("db password=hunter2");
        let error = AresError::internal_with_source("storage failed", source);
        let envelope = error.to_envelope(None);
        assert_eq!(envelope.error.message, "storage failed");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_error_envelope_serialization() {
        let error = AresError::not_found("no such user");
        let envelope = error.to_envelope(Some("req-456"));

        let json = serde_json::to_string(&envelope).expect("serialization should work");
        assert!(json.contains("\"code\":\"NOT_FOUND\""));
        assert!(json.contains("\"request_id\":\"req-456\""));
        assert!(json.contains("\"category\":\"not_found\""));
        assert!(json.starts_with("{\"error\":"));
    }

    #[test]
    fn test_envelope_omits_missing_request_id() {
        let json = serde_json::to_string(&AresError::timeout("slow").to_envelope(None)).unwrap();
        assert!(!json.contains("request_id"));
    }

    #[test]
    fn test_all_error_categories_have_status_codes() {
        for category in ALL {
            let status = category.status_code();
            assert!(
                status.is_client_error() || status.is_server_error(),
                "Category {:?} should map to error status code, got {}",
                category,
                status
            );
            assert_ne!(category.rpc_code(), Code::Ok);
        }
    }
}
