//! Server configuration: size limits, admission control, timeouts and logging.
//!
//! Loaded from a JSON file. Every section and field is optional; missing
//! values take the documented defaults. Limits are checked once, here, so the
//! pipeline never has to re-validate them per call.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const MIB: usize = 1024 * 1024;

pub const DEFAULT_MAX_PARAMETER_SIZE: usize = MIB;
pub const DEFAULT_MAX_RESULT_SIZE: usize = 10 * MIB;
pub const DEFAULT_MAX_RESOURCE_SIZE: usize = 50 * MIB;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 2 * MIB;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Optional JSON schema reference (ignored).
    #[serde(rename = "$schema")]
    _schema: Option<String>,

    pub limits: SizeLimits,
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Check cross-field invariants. Called by [`load_config`] and by the
    /// server builder, so a running server always holds a valid config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        self.concurrency.validate()?;
        self.timeouts.validate()?;
        self.logging.validate()
    }
}

/// Byte-size bounds on serialized payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SizeLimits {
    pub max_parameter_size: usize,
    pub max_result_size: usize,
    pub max_resource_size: usize,
    pub max_message_size: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_parameter_size: DEFAULT_MAX_PARAMETER_SIZE,
            max_result_size: DEFAULT_MAX_RESULT_SIZE,
            max_resource_size: DEFAULT_MAX_RESOURCE_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl SizeLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("maxParameterSize", self.max_parameter_size),
            ("maxResultSize", self.max_result_size),
            ("maxResourceSize", self.max_resource_size),
            ("maxMessageSize", self.max_message_size),
        ];
        if let Some((name, _)) = named.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(format!("{name} must be greater than zero")));
        }
        // Parameters travel inside a message, so they can never be larger.
        if self.max_parameter_size > self.max_message_size {
            return Err(invalid(format!(
                "maxParameterSize ({}) must not exceed maxMessageSize ({})",
                self.max_parameter_size, self.max_message_size
            )));
        }
        Ok(())
    }
}

/// Admission-control limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ConcurrencyConfig {
    /// Calls allowed to run at once across all tools.
    pub max_concurrency: usize,
    /// Per-tool caps. Tools not listed fall back to `max_concurrency`.
    pub per_tool_limits: HashMap<String, usize>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            per_tool_limits: HashMap::new(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(invalid("maxConcurrency must be at least 1"));
        }
        if let Some((tool, _)) = self.per_tool_limits.iter().find(|(_, v)| **v == 0) {
            return Err(invalid(format!(
                "perToolLimits.{tool} must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Execution time budgets, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct TimeoutConfig {
    pub default_timeout_ms: u64,
    pub per_tool_timeouts_ms: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            per_tool_timeouts_ms: HashMap::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(invalid("defaultTimeoutMs must be greater than zero"));
        }
        if let Some((tool, _)) = self.per_tool_timeouts_ms.iter().find(|(_, v)| **v == 0) {
            return Err(invalid(format!(
                "perToolTimeoutsMs.{tool} must be greater than zero"
            )));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| invalid(format!("unknown log level '{}'", self.level)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level().map(|_| ())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}

/// Load, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: ServerConfig =
        serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits, SizeLimits::default());
        assert_eq!(config.concurrency.max_concurrency, 10);
        assert_eq!(config.timeouts.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn size_defaults() {
        let limits = SizeLimits::default();
        assert_eq!(limits.max_parameter_size, 1024 * 1024);
        assert_eq!(limits.max_result_size, 10 * 1024 * 1024);
        assert_eq!(limits.max_resource_size, 50 * 1024 * 1024);
        assert_eq!(limits.max_message_size, 2 * 1024 * 1024);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://example.com/fly-mcp.schema.json",
            "limits": {
                "maxParameterSize": 1000,
                "maxResultSize": 5000,
                "maxResourceSize": 9000,
                "maxMessageSize": 2000
            },
            "concurrency": {
                "maxConcurrency": 4,
                "perToolLimits": {"create_project": 1}
            },
            "timeouts": {
                "defaultTimeoutMs": 5000,
                "perToolTimeoutsMs": {"create_project": 120000}
            },
            "logging": {"level": "debug"}
        }"#;

        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_parameter_size, 1000);
        assert_eq!(config.concurrency.per_tool_limits["create_project"], 1);
        assert_eq!(config.timeouts.per_tool_timeouts_ms["create_project"], 120_000);
        assert_eq!(config.timeouts.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn reject_parameter_size_above_message_size() {
        let json = r#"{"limits": {"maxParameterSize": 4096, "maxMessageSize": 1024}}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("maxParameterSize"));
    }

    #[test]
    fn reject_zero_limits() {
        let json = r#"{"concurrency": {"maxConcurrency": 0}}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{"concurrency": {"perToolLimits": {"build": 0}}}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{"timeouts": {"defaultTimeoutMs": 0}}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_log_level() {
        let json = r#"{"logging": {"level": "loud"}}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let result: Result<ServerConfig, _> = serde_json::from_str(r#"{"unknown": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": {{"maxConcurrency": 2}}}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.concurrency.max_concurrency, 2);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn load_rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
