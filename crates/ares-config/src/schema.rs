//! Configuration schema types.
//!
//! Every section rejects unknown fields and fills unset fields with defaults.

use std::fmt;
use std::time::Duration;

use ares_telemetry::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};

/// Deployment mode, used to pick presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    /// Local development.
    Development,
    /// Production deployment.
    #[default]
    Production,
}

/// Process-level settings.
///
/// # Example
///
/// ```
/// use ares_config::AppConfig;
/// use std::time::Duration;
///
/// let app = AppConfig::default();
/// assert_eq!(app.startup_timeout(), Duration::from_secs(3));
/// assert!(app.drain_timeout().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application name, used in discovery keys and log fields.
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Instance identifier. Generated at startup when empty.
    #[serde(default)]
    pub instance_id: String,

    /// Deployment mode.
    #[serde(default)]
    pub mode: AppMode,

    /// How long every server has to reach `Running` after start.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    /// Upper bound on a graceful drain. Unset means wait for every connection.
    #[serde(default)]
    pub drain_timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Returns the startup window.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Returns the drain bound, if any.
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            instance_id: String::new(),
            mode: AppMode::default(),
            startup_timeout_ms: default_startup_timeout(),
            drain_timeout_secs: None,
        }
    }
}

fn default_app_name() -> String {
    "ares".to_string()
}

const fn default_startup_timeout() -> u64 {
    3000
}

/// Protocol a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerScheme {
    /// HTTP/1.1 with the radix router.
    Http,
    /// gRPC over HTTP/2.
    Grpc,
}

impl ServerScheme {
    /// Returns the scheme as used in discovery keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
        }
    }
}

impl fmt::Display for ServerScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerEntry {
    /// Server name, unique within the application.
    pub name: String,
    /// Protocol.
    pub scheme: ServerScheme,
    /// Listen address as `host:port`.
    pub addr: String,
}

impl ServerEntry {
    /// Creates a server entry.
    pub fn new(name: impl Into<String>, scheme: ServerScheme, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme,
            addr: addr.into(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive (e.g. `info` or `ares_server=debug,hyper=warn`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include file and line in events.
    #[serde(default)]
    pub file_line_info: bool,
}

impl LoggingConfig {
    /// Builds the telemetry logging settings for one application instance.
    #[must_use]
    pub fn to_log_config(&self, app: &AppConfig) -> LogConfig {
        LogConfig {
            level: self.level.clone(),
            format: self.format,
            file_line_info: self.file_line_info,
            app_name: app.name.clone(),
            instance_id: app.instance_id.clone(),
            ..LogConfig::default()
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file_line_info: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Token bucket settings for the rate limit plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether the plugin is installed.
    #[serde(default)]
    pub enabled: bool,

    /// Bucket capacity (burst size).
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Time to add one token, in milliseconds.
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Longest a request may wait for a token, in milliseconds.
    #[serde(default)]
    pub max_wait_ms: u64,
}

impl RateLimitConfig {
    /// Returns the refill interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the maximum wait.
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_capacity(),
            interval_ms: default_interval(),
            max_wait_ms: 0,
        }
    }
}

const fn default_capacity() -> u64 {
    100
}

const fn default_interval() -> u64 {
    10
}
