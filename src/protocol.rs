//! Request/response envelopes and protocol error codes for tool calls.
//!
//! A request looks like `{id, tool, params, confirmed?}`. A response is either
//! `{id, result}` or `{id, error: {code, message, data?}}`. Request ids are
//! strings or integers and are echoed back unchanged. Integer ids must fit in
//! an `i64`; larger integers and fractional ids are rejected as invalid
//! requests.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only method name a tool-call envelope may carry.
pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// Correlation key of a request. Strings and integers are kept distinct.
/// Numeric ids are limited to the `i64` range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// A request to invoke one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: RequestId,
    pub tool: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    /// Caller-asserted assent for tools that require confirmation.
    #[serde(default)]
    pub confirmed: bool,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

impl ToolCallRequest {
    pub fn new(id: impl Into<RequestId>, tool: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            params,
            confirmed: false,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }
}

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    Cancelled,
    Timeout,
    PermissionDenied,
    NotFound,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Cancelled => -32800,
            Self::Timeout => -32801,
            Self::PermissionDenied => -32803,
            Self::NotFound => -32804,
        }
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Cancelled => "Request cancelled",
            Self::Timeout => "Request timed out",
            Self::PermissionDenied => "Permission denied",
            Self::NotFound => "Not found",
        }
    }
}

/// The `error` object of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Either the tool's result or the converted error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    Result(Value),
    Error(ProtocolError),
}

/// The response to one request. `id` is `null` only when the request was too
/// malformed to recover one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl ToolCallResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            body: ResponseBody::Result(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: ProtocolError) -> Self {
        Self {
            id,
            body: ResponseBody::Error(error),
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Result(v) => Some(v),
            ResponseBody::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ProtocolError> {
        match &self.body {
            ResponseBody::Result(_) => None,
            ResponseBody::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }
}

/// Decode a raw request. Malformed input is returned as a ready-made error
/// response: unparseable JSON is a parse error, anything structurally wrong is
/// an invalid request, and a `method` other than `tools/call` is unknown.
pub fn parse_request(json: &str) -> Result<ToolCallRequest, ToolCallResponse> {
    let value: Value = serde_json::from_str(json)
        .map_err(|_| ToolCallResponse::failure(None, ProtocolError::from_code(ErrorCode::ParseError)))?;

    let obj = value.as_object().ok_or_else(|| {
        ToolCallResponse::failure(None, ProtocolError::from_code(ErrorCode::InvalidRequest))
    })?;

    let id = obj
        .get("id")
        .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());
    let Some(id) = id else {
        return Err(ToolCallResponse::failure(
            None,
            ProtocolError::with_message(ErrorCode::InvalidRequest, "missing or invalid id"),
        ));
    };

    if let Some(method) = obj.get("method") {
        if method.as_str() != Some(TOOLS_CALL_METHOD) {
            return Err(ToolCallResponse::failure(
                Some(id),
                ProtocolError::with_message(
                    ErrorCode::MethodNotFound,
                    format!("Method not found: {method}"),
                ),
            ));
        }
    }

    let mut fields = obj.clone();
    fields.remove("method");
    serde_json::from_value(Value::Object(fields)).map_err(|e| {
        ToolCallResponse::failure(
            Some(id),
            ProtocolError::with_message(ErrorCode::InvalidRequest, e.to_string()),
        )
    })
}
