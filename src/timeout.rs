use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::error::ToolError;

/// Resolves the time budget for a call and enforces it.
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    default: Duration,
    per_tool: HashMap<String, Duration>,
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

impl TimeoutManager {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_tool: HashMap::new(),
        }
    }

    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            default: config.default_timeout(),
            per_tool: config
                .per_tool_timeouts_ms
                .iter()
                .map(|(tool, ms)| (tool.clone(), Duration::from_millis(*ms)))
                .collect(),
        }
    }

    pub fn with_tool_timeout(mut self, tool: impl Into<String>, timeout: Duration) -> Self {
        self.per_tool.insert(tool.into(), timeout);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default
    }

    /// Definition override first, then the configured per-tool value, then
    /// the default.
    pub fn resolve(&self, tool: &str, definition_override: Option<Duration>) -> Duration {
        definition_override
            .or_else(|| self.per_tool.get(tool).copied())
            .unwrap_or(self.default)
    }

    /// Run `fut` for at most `duration`. On expiry the future is dropped and
    /// a `Timeout` error naming `operation` is returned.
    pub async fn run<F, T>(&self, operation: &str, duration: Duration, fut: F) -> Result<T, ToolError>
    where
        F: Future<Output = Result<T, ToolError>>,
    {
        match tokio::time::timeout(duration, fut).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                operation: operation.to_string(),
                duration,
            }),
        }
    }
}
