//! Tool-call execution core for the fly scaffolding CLI's AI-integration
//! server.
//!
//! A [`Server`] owns the tool registry, the shared limiters and the
//! [`ToolCallPipeline`]. Each request gets its own [`PipelineContext`] and
//! cancellation token, runs through the pipeline once, and always comes back
//! as a [`ToolCallResponse`].

pub mod cancellation;
pub mod concurrency;
pub mod config;
pub mod confirmation;
pub mod convert;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod protocol;
pub mod resources;
pub mod schema;
pub mod size;
pub mod timeout;
pub mod tools;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

pub use cancellation::{CancellationRegistry, CancellationToken, Registration};
pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
pub use config::{load_config, ServerConfig};
pub use confirmation::{CallerAssertion, ChannelConfirmation, ConfirmationPrompt, ConfirmationProvider};
pub use convert::ErrorConverter;
pub use error::{ConfigError, ErrorKind, LimitScope, RegistryError, ToolError};
pub use events::{
    CallOutcome, ChannelEventSink, ChannelProgressSink, EventSink, LogEvent, NoProgress,
    ProgressSink, ProgressUpdate, TracingEventSink,
};
pub use pipeline::{
    Middleware, Next, PipelineBuilder, PipelineContext, PipelineError, Services, StageKind,
    StageResult, ToolCallPipeline,
};
pub use protocol::{ErrorCode, ProtocolError, RequestId, ToolCallRequest, ToolCallResponse};
pub use resources::{
    PromptDescriptor, PromptMessage, PromptProvider, PromptRegistry, ResourceContent,
    ResourceDescriptor, ResourceProvider, ResourceRegistry, StrategyRegistry,
};
pub use size::{SizeLimit, SizeValidator};
pub use timeout::TimeoutManager;
pub use tools::{handler_fn, ToolContext, ToolDefinition, ToolFlags, ToolHandler, ToolRegistry, ToolSupplier};

/// Wires configuration, tools and collaborators into a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    registry: ToolRegistry,
    events: Arc<dyn EventSink>,
    confirmation: Arc<dyn ConfirmationProvider>,
    progress: Arc<dyn ProgressSink>,
    resources: ResourceRegistry,
    prompts: PromptRegistry,
    pipeline: ToolCallPipeline,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig, registry: ToolRegistry) -> Self {
        Self {
            config,
            registry,
            events: Arc::new(TracingEventSink),
            confirmation: Arc::new(CallerAssertion),
            progress: Arc::new(NoProgress),
            resources: ResourceRegistry::default(),
            prompts: PromptRegistry::default(),
            pipeline: ToolCallPipeline::standard(),
        }
    }

    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Arc::new(sink);
        self
    }

    pub fn with_confirmation(mut self, provider: impl ConfirmationProvider + 'static) -> Self {
        self.confirmation = Arc::new(provider);
        self
    }

    pub fn with_progress_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Arc::new(sink);
        self
    }

    pub fn with_resources(mut self, resources: ResourceRegistry) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = prompts;
        self
    }

    /// Use a customised chain, typically from [`ToolCallPipeline::builder`].
    pub fn with_pipeline(mut self, pipeline: ToolCallPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Validate the configuration and assemble the server.
    pub fn build(self) -> Result<Server, ConfigError> {
        self.config.validate()?;

        let services = Services {
            registry: Arc::new(self.registry),
            limiter: ConcurrencyLimiter::from_config(&self.config.concurrency),
            timeouts: TimeoutManager::from_config(&self.config.timeouts),
            sizes: SizeValidator::new(self.config.limits.clone()),
            events: self.events,
            confirmation: self.confirmation,
            progress: self.progress,
        };
        info!(
            tools = services.registry.len(),
            max_concurrency = self.config.concurrency.max_concurrency,
            stages = ?self.pipeline.stage_names(),
            "tool-call server ready"
        );

        Ok(Server {
            services: Arc::new(services),
            pipeline: self.pipeline,
            cancellations: CancellationRegistry::new(),
            resources: Arc::new(self.resources),
            prompts: Arc::new(self.prompts),
        })
    }
}

/// Runs tool calls. Clones share all state, so one server can be handed to
/// many request tasks.
#[derive(Debug, Clone)]
pub struct Server {
    services: Arc<Services>,
    pipeline: ToolCallPipeline,
    cancellations: CancellationRegistry,
    resources: Arc<ResourceRegistry>,
    prompts: Arc<PromptRegistry>,
}

impl Server {
    pub fn builder(config: ServerConfig, registry: ToolRegistry) -> ServerBuilder {
        ServerBuilder::new(config, registry)
    }

    /// Run one request through the pipeline. Never fails: every error comes
    /// back as an error response carrying the request id.
    pub async fn call(&self, request: ToolCallRequest) -> ToolCallResponse {
        let token = CancellationToken::new(request.tool.clone());
        let _registration = match self.cancellations.register(request.id.clone(), token.clone()) {
            Ok(registration) => registration,
            Err(error) => {
                debug!(request_id = %request.id, "duplicate in-flight request id");
                return ToolCallResponse::failure(
                    Some(request.id),
                    ErrorConverter::new().convert(&error, Some(&request.tool)),
                );
            }
        };

        let mut ctx = PipelineContext::new(request, self.services.clone(), token);
        self.pipeline.execute(&mut ctx).await
    }

    /// Decode a raw request and run it. Oversized or malformed input gets an
    /// error response without reaching the pipeline.
    pub async fn handle_json(&self, raw: &str) -> ToolCallResponse {
        if let Err(error) = self.services.sizes.check_len(SizeLimit::Message, raw.len()) {
            return ToolCallResponse::failure(None, ErrorConverter::new().convert(&error, None));
        }
        match protocol::parse_request(raw) {
            Ok(request) => self.call(request).await,
            Err(response) => response,
        }
    }

    /// Signal cancellation to the in-flight request with this id. Returns
    /// false if no such request is running.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let found = self.cancellations.cancel(id);
        debug!(request_id = %id, found, "cancel requested");
        found
    }

    /// Listing entries for every registered tool.
    pub fn tools(&self) -> Vec<Value> {
        self.services.registry.descriptors()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.services.registry
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.services.limiter
    }

    /// Calls currently holding a concurrency slot.
    pub fn in_flight(&self) -> usize {
        self.services.limiter.in_flight()
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.iter().map(|(_, r)| r.describe()).collect()
    }

    /// Read a resource by key, bounded by the resource size limit.
    pub async fn read_resource(&self, key: &str) -> Result<ResourceContent, ToolError> {
        let content = self.resources.get(key)?.read().await?;
        self.services.sizes.check(SizeLimit::Resource, &content.text)?;
        Ok(content)
    }

    pub fn list_prompts(&self) -> Vec<PromptDescriptor> {
        self.prompts.iter().map(|(_, p)| p.describe()).collect()
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<Vec<PromptMessage>, ToolError> {
        let prompt = self.prompts.get(name)?;
        resources::check_prompt_args(&prompt.describe(), args)?;
        prompt.render(args).await
    }
}
