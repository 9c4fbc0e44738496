//! Route registration errors.

use http::Method;
use thiserror::Error;

/// Errors raised while registering routes.
///
/// These are configuration errors: they surface at startup and are never
/// produced while matching requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The pattern is malformed.
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why the pattern was rejected.
        reason: &'static str,
    },

    /// The same method was registered twice for an equivalent pattern.
    #[error("route conflict: {method} {pattern} is already registered as {existing}")]
    Conflict {
        /// HTTP method of the rejected registration.
        method: Method,
        /// Pattern of the rejected registration.
        pattern: String,
        /// Pattern that already owns the slot.
        existing: String,
    },
}

impl RouteError {
    pub(crate) fn invalid(pattern: &str, reason: &'static str) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        }
    }
}
