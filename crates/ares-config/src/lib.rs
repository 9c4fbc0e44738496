//! Typed configuration for Ares applications.
//!
//! - TOML and JSON configuration files
//! - `.env` files via `dotenvy`
//! - Environment variable overrides (`ARES__SECTION__KEY`)
//! - Strict validation (unknown fields and malformed listen addresses fail)
//!
//! # Example
//!
//! ```no_run
//! use ares_config::ConfigLoader;
//!
//! # fn main() -> Result<(), ares_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("ares.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("ARES")
//!     .load()?;
//!
//! for server in &config.servers {
//!     println!("{} {} on {}", server.scheme, server.name, server.addr);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [app]
//! name = "greeter"
//! mode = "production"
//! startup_timeout_ms = 3000
//! drain_timeout_secs = 30
//!
//! [[servers]]
//! name = "api"
//! scheme = "http"
//! addr = "0.0.0.0:8080"
//!
//! [[servers]]
//! name = "rpc"
//! scheme = "grpc"
//! addr = "0.0.0.0:9090"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [rate_limit]
//! enabled = true
//! capacity = 100
//! interval_ms = 10
//! max_wait_ms = 50
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{AresConfig, AresConfigBuilder};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{AppConfig, AppMode, LoggingConfig, RateLimitConfig, ServerEntry, ServerScheme};
