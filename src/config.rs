//! Configuration management for Ratewarden.
//!
//! Settings come from an optional YAML file, overridden by environment
//! variables of the form `RATEWARDEN__SECTION__FIELD`. They are read once at
//! startup; changing them requires a restart.

use std::net::SocketAddr;
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::ratelimit::{CooldownConfig, FailurePolicy, WindowConfig};
use crate::store::RedisStoreConfig;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Event store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Length of the trailing window in seconds
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Maximum admitted requests per client per window
    #[serde(default = "default_max_rate")]
    pub max_rate: u64,

    /// Deadline for the event store calls of one request, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Behavior when the event store fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Optional in-process cooldown applied in front of the window check
    #[serde(default)]
    pub cooldown: Option<CooldownConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            max_rate: default_max_rate(),
            store_timeout_ms: default_store_timeout_ms(),
            failure_policy: FailurePolicy::default(),
            cooldown: None,
        }
    }
}

fn default_period_secs() -> u64 {
    60
}

fn default_max_rate() -> u64 {
    2
}

fn default_store_timeout_ms() -> u64 {
    500
}

impl RateLimitingConfig {
    /// Build the window configuration.
    pub fn window(&self) -> Result<WindowConfig> {
        Ok(WindowConfig::new(
            Duration::from_secs(self.period_secs),
            self.max_rate,
        )?)
    }

    /// Get the store deadline.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Which event store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis store
    #[default]
    Redis,
    /// Process-local store; counts are not shared between instances
    Memory,
}

/// Event store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default)]
    pub redis: RedisStoreConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default = "default_log_json")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_log_json(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

impl WardenConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }

        let config: WardenConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig =
            serde_yaml::from_str(yaml).map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.window()?;

        if self.rate_limiting.store_timeout_ms == 0 {
            return Err(WardenError::Config(
                "store_timeout_ms must be positive".to_string(),
            ));
        }

        if let Some(cooldown) = &self.rate_limiting.cooldown {
            if cooldown.capacity == 0 {
                return Err(WardenError::Config(
                    "cooldown capacity must be positive".to_string(),
                ));
            }
        }

        if self.store.backend == StoreBackend::Redis && self.store.redis.url.trim().is_empty() {
            return Err(WardenError::Config(
                "redis backend selected without a url".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::WindowError;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.server.http_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.rate_limiting.period_secs, 60);
        assert_eq!(config.rate_limiting.max_rate, 2);
        assert_eq!(config.rate_limiting.store_timeout(), Duration::from_millis(500));
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::Open);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert!(!config.store.redis.url.is_empty());
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  http_addr: 127.0.0.1:9000
rate_limiting:
  period_secs: 10
  max_rate: 5
  store_timeout_ms: 250
  failure_policy: closed
  cooldown:
    min_interval_ms: 100
    penalty_ms: 50
    capacity: 64
store:
  backend: redis
  redis:
    url: redis://cache:6379
    key_prefix: "guestbook:"
    atomic: true
logging:
  level: debug
  json: false
"#;
        let config = WardenConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:9000".parse().unwrap());
        let window = config.rate_limiting.window().unwrap();
        assert_eq!(window.period(), Duration::from_secs(10));
        assert_eq!(window.max_rate(), 5);
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::Closed);
        assert_eq!(config.rate_limiting.cooldown.unwrap().capacity, 64);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis.url, "redis://cache:6379");
        assert!(config.store.redis.atomic);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = WardenConfig::from_yaml("rate_limiting:\n  max_rate: 10\n").unwrap();
        assert_eq!(config.rate_limiting.max_rate, 10);
        assert_eq!(config.rate_limiting.period_secs, 60);
        assert_eq!(config.store.redis.key_prefix, "ratelimit:");
    }

    #[test]
    fn test_memory_backend_is_opt_in() {
        let config = WardenConfig::from_yaml("store:\n  backend: memory\n").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_rejects_zero_max_rate() {
        let result = WardenConfig::from_yaml("rate_limiting:\n  max_rate: 0\n");
        assert!(matches!(
            result,
            Err(WardenError::InvalidWindow(WindowError::ZeroMaxRate))
        ));
    }

    #[test]
    fn test_rejects_zero_period() {
        let result = WardenConfig::from_yaml("rate_limiting:\n  period_secs: 0\n");
        assert!(matches!(
            result,
            Err(WardenError::InvalidWindow(WindowError::ZeroPeriod))
        ));
    }

    #[test]
    fn test_rejects_zero_store_timeout() {
        let result = WardenConfig::from_yaml("rate_limiting:\n  store_timeout_ms: 0\n");
        assert!(matches!(result, Err(WardenError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_cooldown_capacity() {
        let yaml = "rate_limiting:\n  cooldown:\n    capacity: 0\n";
        assert!(WardenConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_redis_without_url() {
        let yaml = "store:\n  backend: redis\n  redis:\n    url: \"\"\n";
        assert!(WardenConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let yaml = "rate_limiting:\n  failure_policy: sometimes\n";
        assert!(WardenConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file_and_env() {
        let path = std::env::temp_dir().join(format!("ratewarden-{}.yaml", std::process::id()));
        std::fs::write(&path, "rate_limiting:\n  period_secs: 30\n  max_rate: 4\n").unwrap();
        std::env::set_var("RATEWARDEN__RATE_LIMITING__MAX_RATE", "7");

        let config = WardenConfig::load(path.to_str()).unwrap();

        std::env::remove_var("RATEWARDEN__RATE_LIMITING__MAX_RATE");
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate_limiting.period_secs, 30);
        assert_eq!(config.rate_limiting.max_rate, 7);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = WardenConfig::load(Some("/nonexistent/ratewarden.yaml"));
        assert!(matches!(result, Err(WardenError::Config(_))));
    }
}
