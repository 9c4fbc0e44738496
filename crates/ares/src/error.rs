//! Application errors and exit status.

use std::process::ExitCode;

use thiserror::Error;

/// Errors raised while assembling or starting an application.
#[derive(Debug, Error)]
pub enum AppError {
    /// Two servers share a `scheme:app:addr` label.
    #[error("server {0} is registered twice")]
    DuplicateServer(String),

    /// Some servers did not reach `Running` within the startup window.
    #[error("startup timed out waiting for: {}", .servers.join(", "))]
    StartupTimeout {
        /// Labels of the servers that were not running.
        servers: Vec<String>,
    },

    /// A server rejected its configuration.
    #[error(transparent)]
    Server(#[from] ares_server::ServerError),

    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// A cron expression did not parse.
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidSchedule {
        /// The expression as given.
        expression: String,
        /// Parser message.
        reason: String,
    },
}

/// How the application ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Drained and stopped cleanly.
    Graceful,
    /// Stopped without draining.
    Immediate,
}

impl Exit {
    /// Returns the process exit code: 0 after a drain, 1 otherwise.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Graceful => 0,
            Self::Immediate => 1,
        }
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        match exit {
            Exit::Graceful => Self::SUCCESS,
            Exit::Immediate => Self::FAILURE,
        }
    }
}
