//! Top-level configuration and validation.

use std::collections::HashSet;

use ares_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::{AppConfig, AppMode, ConfigError, LoggingConfig, RateLimitConfig, ServerEntry, ServerScheme};

/// Complete Ares application configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use ares_config::AresConfig;
///
/// let config = AresConfig::default();
/// assert_eq!(config.servers[0].addr, "0.0.0.0:8080");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AresConfig {
    /// Process-level settings.
    #[serde(default)]
    pub app: AppConfig,

    /// Listeners served by the application.
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerEntry>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for AresConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            servers: default_servers(),
            logging: LoggingConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_servers() -> Vec<ServerEntry> {
    vec![ServerEntry::new("http", ServerScheme::Http, "0.0.0.0:8080")]
}

impl AresConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> AresConfigBuilder {
        AresConfigBuilder::new()
    }

    /// Development preset: pretty debug logs.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.app.mode = AppMode::Development;
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.file_line_info = true;
        config
    }

    /// Production preset: JSON info logs.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.app.mode = AppMode::Production;
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config
    }

    /// Returns the listener with the given name.
    #[must_use]
    pub fn server(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the application name is empty or the startup window is zero
    /// - a listen address is not `host:port` with a valid port
    /// - two listeners share a name
    /// - rate limiting is enabled with a zero capacity or interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.trim().is_empty() {
            return Err(ConfigError::invalid("app.name", "must not be empty"));
        }
        if self.app.startup_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "app.startup_timeout_ms",
                "must be greater than zero",
            ));
        }

        let mut names = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            if server.name.is_empty() {
                return Err(ConfigError::invalid(
                    format!("servers[{i}].name"),
                    "must not be empty",
                ));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
            if let Err(reason) = check_listen_addr(&server.addr) {
                return Err(ConfigError::invalid(
                    format!("servers[{i}].addr"),
                    format!("{reason}: {}", server.addr),
                ));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging.level", "must not be empty"));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.capacity == 0 {
                return Err(ConfigError::invalid(
                    "rate_limit.capacity",
                    "must be greater than zero",
                ));
            }
            if self.rate_limit.interval_ms == 0 {
                return Err(ConfigError::invalid(
                    "rate_limit.interval_ms",
                    "must be greater than zero",
                ));
            }
        }

        Ok(())
    }
}

/// Checks that `addr` is `host:port`. The host may be empty (all interfaces),
/// a name, an IPv4 address or a bracketed IPv6 address.
fn check_listen_addr(addr: &str) -> Result<(), &'static str> {
    let (host, port) = addr.rsplit_once(':').ok_or("missing port")?;
    if port.parse::<u16>().is_err() {
        return Err("invalid port");
    }
    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or("unterminated IPv6 address")?;
        return inner
            .parse::<std::net::Ipv6Addr>()
            .map(|_| ())
            .map_err(|_| "invalid IPv6 address");
    }
    if host.contains(':') {
        return Err("IPv6 hosts must be bracketed");
    }
    if host.chars().any(char::is_whitespace) {
        return Err("invalid host");
    }
    Ok(())
}

/// Builder for [`AresConfig`].
#[derive(Debug, Default)]
pub struct AresConfigBuilder {
    app: Option<AppConfig>,
    servers: Vec<ServerEntry>,
    logging: Option<LoggingConfig>,
    rate_limit: Option<RateLimitConfig>,
}

impl AresConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the application section.
    #[must_use]
    pub fn app(mut self, app: AppConfig) -> Self {
        self.app = Some(app);
        self
    }

    /// Adds a listener. When none are added the default listener is used.
    #[must_use]
    pub fn server(mut self, server: ServerEntry) -> Self {
        self.servers.push(server);
        self
    }

    /// Sets the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Sets the rate limit section.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> AresConfig {
        AresConfig {
            app: self.app.unwrap_or_default(),
            servers: if self.servers.is_empty() {
                default_servers()
            } else {
                self.servers
            },
            logging: self.logging.unwrap_or_default(),
            rate_limit: self.rate_limit.unwrap_or_default(),
        }
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<AresConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
