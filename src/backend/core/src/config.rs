//! Configuration management.

use serde::Deserialize;
use thiserror::Error;

use crate::middleware::RateLimitConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be a positive integer")]
    NonPositive { field: &'static str },

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Config {
    /// Load configuration from the environment (`GATEWAY__SECTION__KEY`).
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"))
            .build()?;

        Self::finish(config)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"))
            .build()?;

        Self::finish(config)
    }

    fn finish(source: config::Config) -> Result<Self, ConfigError> {
        let cfg: Config = source.try_deserialize()?;
        cfg.rate_limit.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<Config, ConfigError> {
        let source = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Config::finish(source)
    }

    #[test]
    fn test_defaults_when_empty() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.rate_limit.requests_per_second, 10);
        assert_eq!(cfg.rate_limit.burst_capacity, 20);
        assert!(cfg.rate_limit.idle_ttl_secs.is_none());
        assert!(cfg.observability.json_logging);
    }

    #[test]
    fn test_rate_limit_section() {
        let cfg = from_toml(
            r#"
            [rate_limit]
            requests_per_second = 1
            burst_capacity = 5
            idle_ttl_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(cfg.rate_limit.requests_per_second, 1);
        assert_eq!(cfg.rate_limit.burst_capacity, 5);
        assert_eq!(cfg.rate_limit.idle_ttl_secs, Some(600));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = from_toml(
            r#"
            [rate_limit]
            burst_capacity = 0
            "#,
        );

        assert!(matches!(
            result,
            Err(ConfigError::NonPositive { field: "rate_limit.burst_capacity" })
        ));
    }
}
