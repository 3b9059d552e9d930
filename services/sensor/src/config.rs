use crate::timestamp::{NaiveTimestampPolicy, NormalizeOptions};
use chrono::FixedOffset;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the sensor service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Time-series store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Timestamp normalization
    #[serde(default)]
    pub timestamps: TimestampConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port, 0 disables the exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// RedisTimeSeries connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Redis URL
    #[serde(default = "default_store_url")]
    pub url: String,
    /// ACL username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-command response timeout in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest batch accepted by `POST /data`
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

/// How offset-less timestamps are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NaivePolicyKind {
    #[default]
    AssumeUtc,
    Reject,
    AssumeOffset,
}

/// Timestamp normalization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TimestampConfig {
    /// Render canonical timestamps in UTC
    #[serde(default = "default_true")]
    pub convert_to_utc: bool,
    /// Policy for timestamps without an offset
    #[serde(default)]
    pub naive_policy: NaivePolicyKind,
    /// Offset east of UTC in seconds, used with `assume_offset`
    #[serde(default)]
    pub naive_offset_secs: i32,
}

// Default value functions
fn default_service_name() -> String {
    "sensor-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_store_url() -> String {
    "redis://redis:6379".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_response_timeout_ms() -> u64 {
    2000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    10_000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "sensor-service")?
            .set_default("service.log_level", "info")?
            .set_default("store.url", "redis://redis:6379")?
            // Add config file if present
            .add_source(config::File::with_name("config/sensor").required(false))
            .add_source(config::File::with_name("/etc/sensor-service/sensor").required(false))
            // Override with environment variables
            // SENSOR__STORE__URL -> store.url
            .add_source(
                config::Environment::with_prefix("SENSOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the deserializer cannot
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.store.url.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("store.url".to_string()));
        }

        if !self.store.url.starts_with("redis://")
            && !self.store.url.starts_with("rediss://")
            && !self.store.url.starts_with("unix://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "store.url".to_string(),
                message: "URL must use redis://, rediss:// or unix://".to_string(),
            });
        }

        if self.api.max_batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.max_batch_size".to_string(),
                message: "Batch size limit must be greater than 0".to_string(),
            });
        }

        if !matches!(self.service.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigValidationError::InvalidValue {
                field: "service.log_format".to_string(),
                message: "Expected json or pretty".to_string(),
            });
        }

        self.timestamps.normalize_options()?;

        Ok(())
    }
}

impl StoreConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get response timeout as Duration
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// URL with any inline password masked, for logging
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &self.url[..scheme_end], &self.url[at..])
            }
            _ => self.url.clone(),
        }
    }
}

impl TimestampConfig {
    /// Build normalizer options
    pub fn normalize_options(&self) -> Result<NormalizeOptions, ConfigValidationError> {
        let naive_policy = match self.naive_policy {
            NaivePolicyKind::AssumeUtc => NaiveTimestampPolicy::AssumeUtc,
            NaivePolicyKind::Reject => NaiveTimestampPolicy::Reject,
            NaivePolicyKind::AssumeOffset => {
                let offset = FixedOffset::east_opt(self.naive_offset_secs).ok_or_else(|| {
                    ConfigValidationError::InvalidValue {
                        field: "timestamps.naive_offset_secs".to_string(),
                        message: "Offset must be within ±24h".to_string(),
                    }
                })?;
                NaiveTimestampPolicy::AssumeOffset(offset)
            }
        };

        Ok(NormalizeOptions {
            convert_to_utc: self.convert_to_utc,
            naive_policy,
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            username: None,
            password: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            convert_to_utc: true,
            naive_policy: NaivePolicyKind::default(),
            naive_offset_secs: 0,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
