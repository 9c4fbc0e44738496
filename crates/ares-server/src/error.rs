//! Server error types.

use std::io;

use ares_router::RouteError;
use thiserror::Error;

/// Errors raised while configuring or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The configured listen address is malformed.
    #[error("invalid listen address '{addr}': {reason}")]
    InvalidAddress {
        /// The rejected address.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Routes or services were registered after the server started.
    #[error("server '{0}' is already serving; registrations are closed")]
    RoutesLocked(String),

    /// An RPC method was registered twice.
    #[error("RPC method {0} is already registered")]
    DuplicateMethod(String),

    /// `serve` was called on a server that is not idle.
    #[error("server '{0}' was already started")]
    AlreadyStarted(String),

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A route could not be registered.
    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
