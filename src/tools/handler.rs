use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::cancellation::CancellationToken;
use crate::error::ToolError;
use crate::events::{NoProgress, ProgressSink, ProgressUpdate};
use crate::protocol::RequestId;

/// A tool's execution handler. Tool authors implement this for each tool.
///
/// Long-running handlers should call [`ToolContext::check_cancelled`] at safe
/// points and release anything external they hold when it fails.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: &Value, ctx: ToolContext) -> Result<Value, ToolError>;
}

/// What a handler gets to see besides its parameters.
#[derive(Clone)]
pub struct ToolContext {
    request_id: RequestId,
    tool: String,
    cancellation: CancellationToken,
    progress: Arc<dyn ProgressSink>,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("request_id", &self.request_id)
            .field("tool", &self.tool)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl ToolContext {
    pub fn new(
        request_id: RequestId,
        tool: impl Into<String>,
        cancellation: CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            request_id,
            tool: tool.into(),
            cancellation,
            progress,
        }
    }

    /// Context with no progress listener, for calling handlers directly.
    pub fn detached(request_id: impl Into<RequestId>, tool: impl Into<String>) -> Self {
        let tool = tool.into();
        let cancellation = CancellationToken::new(tool.clone());
        Self::new(request_id.into(), tool, cancellation, Arc::new(NoProgress))
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn check_cancelled(&self) -> Result<(), ToolError> {
        self.cancellation.check()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn report_progress(&self, progress: f64, total: Option<f64>, message: Option<String>) {
        self.progress.report(ProgressUpdate {
            request_id: self.request_id.clone(),
            tool: self.tool.clone(),
            progress,
            total,
            message,
        });
    }
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, params: &Value, ctx: ToolContext) -> Result<Value, ToolError> {
        (self.f)(params.clone(), ctx).await
    }
}

/// Behavioural annotations surfaced to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFlags {
    pub read_only: bool,
    pub writes_to_disk: bool,
    pub requires_confirmation: bool,
    pub idempotent: bool,
}

/// A registered tool: schemas for clients plus the handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub params_schema: Value,
    pub result_schema: Option<Value>,
    pub flags: ToolFlags,
    pub timeout: Option<Duration>,
    pub max_concurrency: Option<usize>,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("timeout", &self.timeout)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            params_schema: json!({ "type": "object" }),
            result_schema: None,
            flags: ToolFlags::default(),
            timeout: None,
            max_concurrency: None,
            handler: Arc::new(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn params_schema(mut self, schema: Value) -> Self {
        self.params_schema = schema;
        self
    }

    pub fn result_schema(mut self, schema: Value) -> Self {
        self.result_schema = Some(schema);
        self
    }

    pub fn flags(mut self, flags: ToolFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.flags.read_only = true;
        self
    }

    pub fn writes_to_disk(mut self) -> Self {
        self.flags.writes_to_disk = true;
        self
    }

    pub fn requires_confirmation(mut self) -> Self {
        self.flags.requires_confirmation = true;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.flags.idempotent = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    /// Listing entry for clients.
    pub fn descriptor(&self) -> Value {
        let mut entry = json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.params_schema,
            "annotations": self.flags,
        });
        if let (Some(schema), Value::Object(map)) = (&self.result_schema, &mut entry) {
            map.insert("outputSchema".into(), schema.clone());
        }
        entry
    }
}

/// Contributes tool definitions at startup.
pub trait ToolSupplier {
    fn tools(&self) -> Vec<ToolDefinition>;
}
