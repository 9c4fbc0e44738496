//! Structured logging for Ares.
//!
//! # Example
//!
//! ```rust,ignore
//! use ares_telemetry::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::default().app("greeter", "node-1");
//! init_logging(&config)?;
//!
//! let _span = ares_telemetry::logging::app_span(&config).entered();
//! tracing::info!(server = "http", "listening");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line, human-readable output.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive (e.g., "info", "ares_server=debug,hyper=warn").
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Application name attached to every event through [`app_span`].
    pub app_name: String,

    /// Instance ID attached to every event through [`app_span`].
    pub instance_id: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            file_line_info: false,
            include_target: true,
            app_name: "ares".to_string(),
            instance_id: String::new(),
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            file_line_info: true,
            ..Self::default()
        }
    }

    /// Sets the application name and instance ID.
    #[must_use]
    pub fn app(mut self, name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        self.app_name = name.into();
        self.instance_id = instance_id.into();
        self
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => create_env_filter(&directives)?,
        _ => create_env_filter(&config.level)?,
    };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_target(config.include_target)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_target(config.include_target)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
    }

    Ok(())
}

/// Returns the root span carrying the application name and instance ID.
///
/// Events recorded while the span is entered (or inside a future
/// instrumented with it) carry both fields.
#[must_use]
pub fn app_span(config: &LogConfig) -> tracing::Span {
    tracing::info_span!(
        "app",
        app = %config.app_name,
        instance = %config.instance_id
    )
}

/// Creates an env filter from a string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid log filter {filter:?}: {e}")))
}

/// Standard log field names.
pub mod fields {
    /// Request ID field name.
    pub const REQUEST_ID: &str = "request_id";

    /// Server name field name.
    pub const SERVER: &str = "server";

    /// HTTP method or RPC method field name.
    pub const METHOD: &str = "method";

    /// Request path field name.
    pub const PATH: &str = "path";

    /// Response status field name.
    pub const STATUS: &str = "status";

    /// Latency field name.
    pub const LATENCY_MS: &str = "latency_ms";
}
