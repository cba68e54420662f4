//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`ENGINE__APPROVAL_TIMEOUT_SECONDS=900`).

use concierge_routing::{EngineConfig, IdentityPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Base URL of the model backend that runs assistants.
    pub assistant_url: String,

    /// Base URL of the travel tools backend.
    pub tools_url: String,

    /// Base URL of the traveller directory.
    pub identity_url: String,

    /// Timeout for every outbound request, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Dialog engine settings.
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Dialog engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Pending approvals older than this are rejected. Unset keeps them open.
    #[serde(default)]
    pub approval_timeout_seconds: Option<u64>,

    /// Whether a turn may proceed when the traveller cannot be identified.
    #[serde(default)]
    pub identity_policy: IdentityPolicy,

    /// Upper bound on steps in one turn.
    #[serde(default = "default_max_steps_per_turn")]
    pub max_steps_per_turn: usize,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_steps_per_turn() -> usize {
    concierge_routing::engine::DEFAULT_MAX_STEPS_PER_TURN
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            approval_timeout_seconds: None,
            identity_policy: IdentityPolicy::default(),
            max_steps_per_turn: default_max_steps_per_turn(),
        }
    }
}

impl EngineSettings {
    /// Converts the settings into the engine's configuration.
    #[must_use]
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            approval_timeout: self.approval_timeout_seconds.map(Duration::from_secs),
            identity_policy: self.identity_policy,
            max_steps_per_turn: self.max_steps_per_turn,
        }
    }
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

    /// Returns the outbound request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
