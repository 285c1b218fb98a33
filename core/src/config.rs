use std::{env, path::Path, time::Duration};

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Resubmissions allowed before a pending transaction is failed
    pub retry_limit: u32,
    /// How often the block tracker polls for a new head
    pub poll_interval_ms: u64,
    pub log_format: LogFormat,
    pub rpc_url: String,
    /// Network the tracked transactions belong to
    pub network_id: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3500,
            poll_interval_ms: 4000,
            log_format: LogFormat::Pretty,
            rpc_url: "http://localhost:8545".to_string(),
            network_id: "1".to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Loads `tracker_base.yaml` and `tracker_<environment>.yaml` from `configuration_directory`,
/// then `APP__*` environment variables. Every layer is optional; missing keys keep their
/// defaults.
pub fn load_config(configuration_directory: &Path) -> Result<TrackerConfig, ConfigError> {
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let environment_filename = format!("tracker_{}.yaml", environment.as_str());

    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("tracker_base.yaml")).required(false))
        .add_source(
            File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?;

    let tracker_config = config.try_deserialize::<TrackerConfig>()?;

    if tracker_config.poll_interval_ms == 0 {
        return Err(ConfigError::Message(
            "poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    tracing::debug!(
        retry_limit = tracker_config.retry_limit,
        poll_interval_ms = tracker_config.poll_interval_ms,
        environment = environment.as_str(),
        "Loaded tracker configuration"
    );

    Ok(tracker_config)
}

/// The possible runtime environment for the tracker.
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local`, `development`, or `production`."
            )),
        }
    }
}
