//! Centralized server configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! environment variables, composed from the session crate's configs.
//! Nested keys use a double underscore, e.g. `IDENTITY__CLIENT_ID` or
//! `SESSION__REQUEST_TIMEOUT_SECONDS`.

use gpu_console_session::{IdentityConfig, SessionConfig};
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Identity provider endpoints and client registration.
    pub identity: IdentityConfig,

    /// Session lifecycle configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
