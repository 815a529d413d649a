use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::concurrency::ConcurrencyLimiter;
use crate::confirmation::{CallerAssertion, ConfirmationProvider};
use crate::error::ToolError;
use crate::events::{EventSink, NoProgress, ProgressSink, TracingEventSink};
use crate::protocol::ToolCallRequest;
use crate::size::SizeValidator;
use crate::timeout::TimeoutManager;
use crate::tools::{ToolDefinition, ToolRegistry};

/// Everything a stage may consult that outlives a single request.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<ToolRegistry>,
    pub limiter: ConcurrencyLimiter,
    pub timeouts: TimeoutManager,
    pub sizes: SizeValidator,
    pub events: Arc<dyn EventSink>,
    pub confirmation: Arc<dyn ConfirmationProvider>,
    pub progress: Arc<dyn ProgressSink>,
}

impl Services {
    /// Default limits and collaborators around `registry`.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            limiter: ConcurrencyLimiter::default(),
            timeouts: TimeoutManager::default(),
            sizes: SizeValidator::default(),
            events: Arc::new(TracingEventSink),
            confirmation: Arc::new(CallerAssertion),
            progress: Arc::new(NoProgress),
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("tools", &self.registry.len())
            .field("limiter", &self.limiter)
            .field("timeouts", &self.timeouts)
            .field("sizes", &self.sizes)
            .finish_non_exhaustive()
    }
}

/// Per-request state threaded by `&mut` through every stage. Never shared
/// between requests.
#[derive(Debug)]
pub struct PipelineContext {
    pub request: ToolCallRequest,
    pub services: Arc<Services>,
    pub cancellation: CancellationToken,
    /// Set by validation.
    pub tool: Option<Arc<ToolDefinition>>,
    /// Set by setup.
    pub timeout: Option<Duration>,
    /// Set by setup.
    pub concurrency_limit: Option<usize>,
}

impl PipelineContext {
    pub fn new(
        request: ToolCallRequest,
        services: Arc<Services>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            request,
            services,
            cancellation,
            tool: None,
            timeout: None,
            concurrency_limit: None,
        }
    }

    /// The resolved tool. Errors if a stage runs before validation bound it.
    pub fn tool(&self) -> Result<Arc<ToolDefinition>, ToolError> {
        self.tool.clone().ok_or_else(|| {
            ToolError::internal(format!(
                "tool {} was not resolved before it was needed",
                self.request.tool
            ))
        })
    }
}
