use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The closed set of failure classes a tool call can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidParams,
    Cancelled,
    Timeout,
    ConcurrencyExceeded,
    PermissionDenied,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::InvalidParams => "invalid_params",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::ConcurrencyExceeded => "concurrency_exceeded",
            Self::PermissionDenied => "permission_denied",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Which counter rejected a concurrency admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    Tool,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Tool => f.write_str("tool"),
        }
    }
}

/// Every way a tool call can fail. Stages return these unmodified; the
/// error-handling stage is the only place they become protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{entity} not found: {name}")]
    NotFound { entity: &'static str, name: String },

    #[error("invalid params: {message}")]
    InvalidParams {
        message: String,
        fields: Vec<String>,
        detail: Option<Value>,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("{operation} timed out after {}ms", .duration.as_millis())]
    Timeout { operation: String, duration: Duration },

    #[error("concurrency limit reached for {tool} ({scope}): {current}/{limit}")]
    ConcurrencyExceeded {
        tool: String,
        scope: LimitScope,
        current: usize,
        limit: usize,
    },

    #[error("permission denied for {tool}: {reason}")]
    PermissionDenied { tool: String, reason: String },

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ToolError {
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "tool",
            name: name.into(),
        }
    }

    pub fn not_found(entity: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }

    /// Invalid input naming the offending field(s).
    pub fn invalid_params(message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            fields,
            detail: None,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn permission_denied(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary failure. The source is kept for local diagnostics
    /// only; it never reaches a protocol response.
    pub fn internal_from(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Attach structured detail to an `InvalidParams` error. No-op for other kinds.
    pub fn with_detail(mut self, value: Value) -> Self {
        if let Self::InvalidParams { detail, .. } = &mut self {
            *detail = Some(value);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ConcurrencyExceeded { .. } => ErrorKind::ConcurrencyExceeded,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Only admission rejections are safe to retry blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyExceeded { .. })
    }

    /// Structured payload carried into the protocol error's `data` field.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::NotFound { entity, name } => Some(json!({ "entity": entity, "name": name })),
            Self::InvalidParams { fields, detail, .. } => {
                let mut data = json!({ "fields": fields });
                if let (Some(Value::Object(extra)), Value::Object(map)) = (detail, &mut data) {
                    for (k, v) in extra {
                        map.insert(k.clone(), v.clone());
                    }
                }
                Some(data)
            }
            Self::Cancelled { operation } => Some(json!({ "operation": operation })),
            Self::Timeout {
                operation,
                duration,
            } => Some(json!({
                "operation": operation,
                "durationMs": duration.as_millis() as u64,
            })),
            Self::ConcurrencyExceeded {
                tool,
                scope,
                current,
                limit,
            } => Some(json!({
                "toolName": tool,
                "scope": scope,
                "current": current,
                "limit": limit,
            })),
            Self::PermissionDenied { tool, reason } => {
                Some(json!({ "toolName": tool, "reason": reason }))
            }
            Self::Internal { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("already registered: {0}")]
    Duplicate(String),
    #[error("invalid definition for {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {path}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file: {path}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("configuration validation failed: {message}")]
    ValidationError { message: String },
}
