//! Configuration for relay-daemon

use relay_controller::ControllerConfig;
use relay_engine::CredentialsConfig;
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, DaemonResult};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Promotion controller configuration
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Credentials handed to promotion steps
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, or any `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and `RELAY_*`
    /// environment variables, later sources winning.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `RELAY_CONTROLLER__SHARD_NAME=east`.
    pub fn load(path: Option<&str>) -> DaemonResult<Self> {
        let config = Self::load_with_env(path, config::Environment::with_prefix("RELAY"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> DaemonResult<()> {
        if self.controller.default_requeue_interval_secs == 0 {
            return Err(DaemonError::InvalidConfig(
                "controller.default_requeue_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn load_with_env(
        path: Option<&str>,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            env.prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
