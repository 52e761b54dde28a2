use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use erinnerung_core::resources::DEFAULT_BACKOFF_LIMIT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(String),

    #[error("config deserialize error: {0}")]
    Deserialize(String),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Resources applied at startup
    #[serde(default)]
    pub manifests: ManifestsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Controller validations
        if self.controller.workers == 0 {
            return Err(ConfigError::Invalid("controller.workers must be > 0".into()));
        }
        if self.controller.requeue_after_secs == 0 || self.controller.pass_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "controller timeouts must be > 0".into(),
            ));
        }
        // Delivery validations
        if self.delivery.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "delivery.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.delivery.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "delivery.request_timeout_ms must be > 0".into(),
            ));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }

    /// Renders the effective configuration as TOML with the signing secret
    /// masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.delivery.signing_secret.is_some() {
            shown.delivery.signing_secret = Some("<redacted>".into());
        }
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::Build(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_requeue_after_secs")]
    pub requeue_after_secs: u64,
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,
    /// 0 disables periodic resync
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// Namespaces to reconcile; empty means all
    #[serde(default)]
    pub namespaces: Vec<String>,
}

fn default_workers() -> usize {
    4
}
fn default_requeue_after_secs() -> u64 {
    10
}
fn default_pass_timeout_secs() -> u64 {
    30
}
fn default_resync_interval_secs() -> u64 {
    300
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requeue_after_secs: default_requeue_after_secs(),
            pass_timeout_secs: default_pass_timeout_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            namespaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Applied to endpoints that do not set `backoffLimit`
    #[serde(default = "default_backoff_limit")]
    pub default_backoff_limit: u32,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// HMAC-SHA256 key for the `X-Signature-256` header
    #[serde(default)]
    pub signing_secret: Option<String>,
}

fn default_delivery_enabled() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_backoff_limit() -> u32 {
    DEFAULT_BACKOFF_LIMIT
}
fn default_content_type() -> String {
    "application/json".into()
}

impl DeliveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_delivery_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            default_backoff_limit: default_backoff_limit(),
            content_type: default_content_type(),
            signing_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManifestsConfig {
    /// JSON file of resources to apply at startup
    #[serde(default)]
    pub path: Option<String>,
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Name of the configuration file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "erinnerung.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., ERINNERUNG__CONTROLLER__WORKERS=8
        builder = builder.add_source(
            Environment::with_prefix("ERINNERUNG")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("controller.namespaces"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        merged.validate()?;
        Ok(merged)
    }
}
