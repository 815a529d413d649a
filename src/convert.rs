use serde_json::{json, Map, Value};

use crate::error::{ErrorKind, ToolError};
use crate::protocol::{ErrorCode, ProtocolError};

/// Maps internal failures onto protocol errors. Pure and deterministic: the
/// same error always produces the same code, message and data.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorConverter;

impl ErrorConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn code_for(kind: ErrorKind) -> ErrorCode {
        match kind {
            ErrorKind::NotFound => ErrorCode::NotFound,
            ErrorKind::InvalidParams => ErrorCode::InvalidParams,
            ErrorKind::Cancelled => ErrorCode::Cancelled,
            ErrorKind::Timeout => ErrorCode::Timeout,
            ErrorKind::ConcurrencyExceeded | ErrorKind::PermissionDenied => {
                ErrorCode::PermissionDenied
            }
            ErrorKind::Internal => ErrorCode::InternalError,
        }
    }

    /// Convert an error for the wire. `tool` is added to the data payload when
    /// the error doesn't already name one. Internal errors keep their message
    /// but never their source chain.
    pub fn convert(&self, error: &ToolError, tool: Option<&str>) -> ProtocolError {
        let code = Self::code_for(error.kind());
        let message = match error {
            ToolError::Internal { message, .. } => format!("Internal error: {message}"),
            other => other.to_string(),
        };

        let mut data = match error.data() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Some(tool) = tool {
            data.entry("toolName")
                .or_insert_with(|| Value::String(tool.to_string()));
        }
        data.insert("kind".into(), json!(error.kind()));

        ProtocolError::with_message(code, message).with_data(Value::Object(data))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::LimitScope;

    fn convert(err: ToolError) -> ProtocolError {
        ErrorConverter::new().convert(&err, Some("echo"))
    }

    #[test]
    fn maps_every_kind() {
        assert_eq!(convert(ToolError::tool_not_found("x")).code, -32804);
        assert_eq!(convert(ToolError::invalid_params("bad", vec![])).code, -32602);
        assert_eq!(convert(ToolError::cancelled("echo")).code, -32800);
        assert_eq!(
            convert(ToolError::Timeout {
                operation: "echo".into(),
                duration: Duration::from_millis(5),
            })
            .code,
            -32801
        );
        assert_eq!(
            convert(ToolError::ConcurrencyExceeded {
                tool: "echo".into(),
                scope: LimitScope::Global,
                current: 1,
                limit: 1,
            })
            .code,
            -32803
        );
        assert_eq!(convert(ToolError::permission_denied("echo", "no")).code, -32803);
        assert_eq!(convert(ToolError::internal("boom")).code, -32603);
    }

    #[test]
    fn adds_tool_name_without_overwriting() {
        let err = convert(ToolError::internal("boom"));
        let data = err.data.unwrap();
        assert_eq!(data["toolName"], "echo");
        assert_eq!(data["kind"], "internal");

        let err = ErrorConverter::new().convert(
            &ToolError::permission_denied("delete", "needs confirmation"),
            Some("other"),
        );
        assert_eq!(err.data.unwrap()["toolName"], "delete");
    }

    #[test]
    fn internal_hides_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "secret path /home/x");
        let err = convert(ToolError::internal_from("template render failed", io));
        assert_eq!(err.message, "Internal error: template render failed");
        let text = serde_json::to_string(&err).unwrap();
        assert!(!text.contains("secret path"));
    }

    #[test]
    fn conversion_is_deterministic() {
        let a = convert(ToolError::invalid_params("bad", vec!["message".into()]));
        let b = convert(ToolError::invalid_params("bad", vec!["message".into()]));
        assert_eq!(a, b);
        assert_eq!(a.data.unwrap()["fields"][0], "message");
    }
}
