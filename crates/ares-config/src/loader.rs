//! Configuration loader with layered approach.
//!
//! Layers apply in order, later layers overriding earlier ones:
//! 1. Default values (built into the code)
//! 2. Configuration file (TOML or JSON)
//! 3. `.env` file (copied into the process environment)
//! 4. Environment variables with a prefix

use std::env;
use std::fs;
use std::path::Path;

use ares_telemetry::LogFormat;

use crate::{AppMode, AresConfig, ConfigError};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "ARES";

/// Configuration loader.
///
/// # Example
///
/// ```no_run
/// use ares_config::ConfigLoader;
///
/// # fn main() -> Result<(), ares_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("ares.toml")?
///     .with_dotenv()?
///     .with_env_prefix("ARES")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: AresConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AresConfig::default(),
            env_prefix: None,
        }
    }

    /// Starts from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = AresConfig::development();
        self
    }

    /// Starts from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = AresConfig::production();
        self
    }

    /// Loads configuration from a file. The format follows the extension
    /// (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed or
    /// contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::missing(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Loads configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration from a string in the given format (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use ares_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[app]\nname = \"greeter\"", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.app.name, "greeter");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::UnsupportedFormat(format.to_string())),
        };
        Ok(self)
    }

    /// Loads `.env` from the working directory (or a parent) into the
    /// process environment. A missing file is ignored.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(err) if err.not_found() => Ok(self),
            Err(err) => Err(err.into()),
        }
    }

    /// Loads a specific dotenv file into the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or malformed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path.as_ref())?;
        Ok(self)
    }

    /// Sets the environment variable prefix for overrides.
    ///
    /// Variables use the form `PREFIX__SECTION__KEY`, for example
    /// `ARES__APP__NAME=greeter` or `ARES__SERVERS__API__ADDR=:9000`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(mut self) -> Result<AresConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_vars(&prefix, env::vars())?;
        }
        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without env overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> AresConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<AresConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_vars(
        &mut self,
        prefix: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        for (key, value) in vars {
            if let Some(path) = key.strip_prefix(&marker) {
                self.apply_env_var(&key, path, &value)?;
            }
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, path: &str, value: &str) -> Result<(), ConfigError> {
        let parts: Vec<&str> = path.split("__").collect();

        match parts.as_slice() {
            ["APP", "NAME"] => self.config.app.name = value.to_string(),
            ["APP", "INSTANCE_ID"] => self.config.app.instance_id = value.to_string(),
            ["APP", "MODE"] => {
                self.config.app.mode = match value.to_lowercase().as_str() {
                    "development" | "dev" => AppMode::Development,
                    "production" | "prod" => AppMode::Production,
                    _ => {
                        return Err(ConfigError::env(
                            key,
                            "expected 'development' or 'production'",
                        ))
                    }
                };
            }
            ["APP", "STARTUP_TIMEOUT_MS"] => {
                self.config.app.startup_timeout_ms = parse_int(key, value)?;
            }
            ["APP", "DRAIN_TIMEOUT_SECS"] => {
                self.config.app.drain_timeout_secs = if value.is_empty() || value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(parse_int(key, value)?)
                };
            }

            ["SERVERS", name, "ADDR"] => {
                let server = self
                    .config
                    .servers
                    .iter_mut()
                    .find(|s| s.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| ConfigError::env(key, format!("no server named {name}")))?;
                server.addr = value.to_string();
            }

            ["LOGGING", "LEVEL"] => self.config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                self.config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::env(key, "expected 'json' or 'pretty'")),
                };
            }
            ["LOGGING", "FILE_LINE_INFO"] => {
                self.config.logging.file_line_info = parse_bool(value)
                    .ok_or_else(|| ConfigError::env(key, "expected boolean"))?;
            }

            ["RATE_LIMIT", "ENABLED"] => {
                self.config.rate_limit.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env(key, "expected boolean"))?;
            }
            ["RATE_LIMIT", "CAPACITY"] => self.config.rate_limit.capacity = parse_int(key, value)?,
            ["RATE_LIMIT", "INTERVAL_MS"] => self.config.rate_limit.interval_ms = parse_int(key, value)?,
            ["RATE_LIMIT", "MAX_WAIT_MS"] => self.config.rate_limit.max_wait_ms = parse_int(key, value)?,

            // Unrelated variables sharing the prefix are ignored
            _ => {}
        }

        Ok(())
    }
}

fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env(key, "expected integer"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerScheme;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.app.name, "ares");
        assert_eq!(config.servers[0].addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_loader_presets() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.logging.level, "debug");
        let config = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"app": {"name": "greeter"}, "servers": [{"name": "rpc", "scheme": "grpc", "addr": ":9090"}]}"#;
        let config = ConfigLoader::new().with_string(json, "json").unwrap().load().unwrap();
        assert_eq!(config.app.name, "greeter");
        assert_eq!(config.servers[0].scheme, ServerScheme::Grpc);
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        assert!(ConfigLoader::new().with_string("", "yaml").is_err());
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let err = ConfigLoader::new().with_file("/nonexistent/ares.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/ares.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.app.name, "ares");
    }

    #[test]
    fn test_env_overrides() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_vars(
                "TEST",
                vars(&[
                    ("TEST__APP__NAME", "greeter"),
                    ("TEST__APP__MODE", "dev"),
                    ("TEST__APP__STARTUP_TIMEOUT_MS", "500"),
                    ("TEST__APP__DRAIN_TIMEOUT_SECS", "10"),
                    ("TEST__SERVERS__HTTP__ADDR", "127.0.0.1:9000"),
                    ("TEST__LOGGING__FORMAT", "pretty"),
                    ("TEST__RATE_LIMIT__ENABLED", "on"),
                    ("TEST__RATE_LIMIT__CAPACITY", "5"),
                    ("OTHER__APP__NAME", "ignored"),
                    ("TESTING__APP__NAME", "ignored"),
                ]),
            )
            .unwrap();

        let config = loader.load().unwrap();
        assert_eq!(config.app.name, "greeter");
        assert_eq!(config.app.mode, AppMode::Development);
        assert_eq!(config.app.startup_timeout(), Duration::from_millis(500));
        assert_eq!(config.app.drain_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.servers[0].addr, "127.0.0.1:9000");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.capacity, 5);
    }

    #[test]
    fn test_env_override_errors() {
        let mut loader = ConfigLoader::new();
        let err = loader
            .apply_env_vars("TEST", vars(&[("TEST__APP__STARTUP_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));

        let err = loader
            .apply_env_vars("TEST", vars(&[("TEST__SERVERS__MISSING__ADDR", ":1")]))
            .unwrap_err();
        assert!(err.to_string().contains("MISSING"));
    }

    #[test]
    fn test_env_override_is_validated() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_vars("TEST", vars(&[("TEST__SERVERS__HTTP__ADDR", "nowhere")]))
            .unwrap();
        assert!(matches!(loader.load(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
