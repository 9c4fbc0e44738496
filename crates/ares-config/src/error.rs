//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration could not be loaded or accepted.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("configuration file {} does not exist", .path.display())]
    Missing {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A file exists but could not be read.
    #[error("cannot read configuration file {}", .path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file or string is neither TOML nor JSON.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// TOML syntax or schema mismatch, unknown keys included.
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or schema mismatch, unknown keys included.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// An explicitly requested `.env` file failed to load.
    #[error("cannot load dotenv file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// An environment override could not be applied.
    #[error("environment variable {var}: {reason}")]
    Env {
        /// Full variable name, prefix included.
        var: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A loaded value failed validation.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted path of the field, e.g. `servers[1].addr`.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Two `[[servers]]` entries share a name.
    #[error("server name {0:?} is used more than once")]
    DuplicateServer(String),
}

impl ConfigError {
    pub(crate) fn missing(path: impl Into<PathBuf>) -> Self {
        Self::Missing { path: path.into() }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn env(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
