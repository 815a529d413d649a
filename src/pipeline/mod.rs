//! The ordered middleware chain every tool call runs through.
//!
//! Each stage gets the request context and a [`Next`] continuation for the
//! rest of the chain. A stage may short-circuit by returning without calling
//! `next`, and may act after the inner stages return. Built-in stages, outermost
//! first:
//!
//! 1. **ErrorHandling** turns every error (and panic) into an error response
//! 2. **Logging** records one event per call
//! 3. **Validation** checks sizes, resolves the tool, checks params
//! 4. **Confirmation** gates tools that need assent
//! 5. **Setup** binds the effective timeout and concurrency limit
//! 6. **Concurrency** admits the call or rejects it immediately
//! 7. **Timeout** bounds everything inside it
//! 8. **ResultConversion** checks and shapes the handler's result
//! 9. **Execution** runs the handler
//!
//! Custom middleware can be slotted in between with [`PipelineBuilder`]; the
//! relative order above is checked when the pipeline is built.

mod concurrency;
mod confirmation;
pub mod context;
mod error_handling;
mod execution;
mod logging;
mod result;
mod setup;
mod timeout;
mod validation;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::convert::ErrorConverter;
use crate::error::ToolError;
use crate::protocol::ToolCallResponse;

pub use concurrency::ConcurrencyStage;
pub use confirmation::ConfirmationStage;
pub use context::{PipelineContext, Services};
pub use error_handling::ErrorHandlingStage;
pub use execution::ExecutionStage;
pub use logging::LoggingStage;
pub use result::ResultConversionStage;
pub use setup::SetupStage;
pub use timeout::TimeoutStage;
pub use validation::ValidationStage;

pub type StageResult = Result<ToolCallResponse, ToolError>;

/// Identifies a built-in stage, or marks a stage as custom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    ErrorHandling,
    Logging,
    Validation,
    Confirmation,
    Setup,
    Concurrency,
    Timeout,
    ResultConversion,
    Execution,
    Custom,
}

impl StageKind {
    /// Built-in stages, outermost first.
    pub const CHAIN_ORDER: [StageKind; 9] = [
        StageKind::ErrorHandling,
        StageKind::Logging,
        StageKind::Validation,
        StageKind::Confirmation,
        StageKind::Setup,
        StageKind::Concurrency,
        StageKind::Timeout,
        StageKind::ResultConversion,
        StageKind::Execution,
    ];

    fn position(self) -> Option<usize> {
        Self::CHAIN_ORDER.iter().position(|k| *k == self)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ErrorHandling => "error_handling",
            Self::Logging => "logging",
            Self::Validation => "validation",
            Self::Confirmation => "confirmation",
            Self::Setup => "setup",
            Self::Concurrency => "concurrency",
            Self::Timeout => "timeout",
            Self::ResultConversion => "result_conversion",
            Self::Execution => "execution",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// One link in the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Built-in stages report their kind; custom middleware keeps the default.
    fn stage(&self) -> StageKind {
        StageKind::Custom
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult;
}

/// The remainder of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    fn new(stages: &'a [Arc<dyn Middleware>]) -> Self {
        Self { stages }
    }

    /// Run the rest of the chain. Consumes the continuation, so a stage can
    /// call it at most once.
    pub async fn run(self, ctx: &mut PipelineContext) -> StageResult {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(ctx, Next::new(rest)).await,
            None => Err(ToolError::internal("pipeline ended without a response")),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("missing built-in stage: {0}")]
    MissingStage(StageKind),
    #[error("built-in stage appears more than once: {0}")]
    DuplicateStage(StageKind),
    #[error("stage {stage} must run inside {outer}")]
    OutOfOrder { stage: StageKind, outer: StageKind },
    #[error("error_handling must be the outermost stage, found {0}")]
    NotOutermost(String),
    #[error("execution must be the innermost stage, found {0}")]
    NotInnermost(String),
    #[error("no {0} stage to insert next to")]
    UnknownAnchor(StageKind),
}

/// An immutable, order-checked chain. Cheap to clone.
#[derive(Clone)]
pub struct ToolCallPipeline {
    stages: Arc<[Arc<dyn Middleware>]>,
}

impl fmt::Debug for ToolCallPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCallPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Default for ToolCallPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl ToolCallPipeline {
    /// The nine built-in stages in their canonical order.
    pub fn standard() -> Self {
        Self {
            stages: standard_stages().into(),
        }
    }

    /// Start from the standard chain and customise it.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::standard()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the chain once. Always yields a response: an error escaping the
    /// chain (only possible with a custom error stage) is converted here.
    pub async fn execute(&self, ctx: &mut PipelineContext) -> ToolCallResponse {
        match Next::new(&self.stages).run(ctx).await {
            Ok(response) => response,
            Err(error) => ToolCallResponse::failure(
                Some(ctx.request.id.clone()),
                ErrorConverter::new().convert(&error, Some(&ctx.request.tool)),
            ),
        }
    }
}

fn standard_stages() -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(ErrorHandlingStage),
        Arc::new(LoggingStage),
        Arc::new(ValidationStage),
        Arc::new(ConfirmationStage),
        Arc::new(SetupStage),
        Arc::new(ConcurrencyStage),
        Arc::new(TimeoutStage),
        Arc::new(ResultConversionStage),
        Arc::new(ExecutionStage),
    ]
}

/// Assembles a chain. Edits are recorded and the first failed one is
/// reported by [`build`](Self::build).
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Middleware>>,
    error: Option<PipelineError>,
}

impl PipelineBuilder {
    /// An empty chain, for assembling stages by hand with [`push`](Self::push).
    pub fn empty() -> Self {
        Self {
            stages: Vec::new(),
            error: None,
        }
    }

    pub fn standard() -> Self {
        Self {
            stages: standard_stages(),
            error: None,
        }
    }

    /// Append as the new innermost stage.
    pub fn push(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Insert `stage` just outside the built-in `anchor`.
    pub fn insert_before(self, anchor: StageKind, stage: impl Middleware + 'static) -> Self {
        self.insert_at(anchor, 0, Arc::new(stage))
    }

    /// Insert `stage` just inside the built-in `anchor`.
    pub fn insert_after(self, anchor: StageKind, stage: impl Middleware + 'static) -> Self {
        self.insert_at(anchor, 1, Arc::new(stage))
    }

    /// Swap a built-in stage for another implementation of the same kind.
    pub fn replace(mut self, kind: StageKind, stage: impl Middleware + 'static) -> Self {
        match self.find(kind) {
            Some(i) => self.stages[i] = Arc::new(stage),
            None => self.fail(PipelineError::UnknownAnchor(kind)),
        }
        self
    }

    fn insert_at(mut self, anchor: StageKind, offset: usize, stage: Arc<dyn Middleware>) -> Self {
        match self.find(anchor) {
            Some(i) => self.stages.insert(i + offset, stage),
            None => self.fail(PipelineError::UnknownAnchor(anchor)),
        }
        self
    }

    fn find(&self, kind: StageKind) -> Option<usize> {
        if kind == StageKind::Custom {
            return None;
        }
        self.stages.iter().position(|s| s.stage() == kind)
    }

    fn fail(&mut self, error: PipelineError) {
        self.error.get_or_insert(error);
    }

    pub fn build(self) -> Result<ToolCallPipeline, PipelineError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        check_order(&self.stages)?;
        Ok(ToolCallPipeline {
            stages: self.stages.into(),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::standard()
    }
}

fn check_order(stages: &[Arc<dyn Middleware>]) -> Result<(), PipelineError> {
    for kind in StageKind::CHAIN_ORDER {
        match stages.iter().filter(|s| s.stage() == kind).count() {
            0 => return Err(PipelineError::MissingStage(kind)),
            1 => {}
            _ => return Err(PipelineError::DuplicateStage(kind)),
        }
    }

    // Non-empty: every built-in kind is present.
    if let Some(first) = stages.first() {
        if first.stage() != StageKind::ErrorHandling {
            return Err(PipelineError::NotOutermost(first.name().to_string()));
        }
    }
    if let Some(last) = stages.last() {
        if last.stage() != StageKind::Execution {
            return Err(PipelineError::NotInnermost(last.name().to_string()));
        }
    }

    let mut previous: Option<(StageKind, usize)> = None;
    for kind in stages.iter().map(|s| s.stage()) {
        let Some(position) = kind.position() else {
            continue;
        };
        if let Some((inner, inner_position)) = previous {
            if position < inner_position {
                return Err(PipelineError::OutOfOrder { stage: inner, outer: kind });
            }
        }
        previous = Some((kind, position));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::protocol::ToolCallRequest;
    use crate::tools::{handler_fn, ToolDefinition, ToolRegistry};

    /// Records the order stages were entered in.
    struct Trace {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Trace {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
            self.seen.lock().unwrap().push(self.name);
            next.run(ctx).await
        }
    }

    struct Fixed(StageKind);

    #[async_trait]
    impl Middleware for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn stage(&self) -> StageKind {
            self.0
        }

        async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
            next.run(ctx).await
        }
    }

    pub(crate) fn echo_registry(calls: Arc<AtomicUsize>) -> ToolRegistry {
        let handler = handler_fn(move |params: Value, _ctx| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ToolError>(json!({ "message": params["message"] }))
            }
        });
        ToolRegistry::new()
            .with_tool(ToolDefinition::new("echo", handler).params_schema(json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })))
            .unwrap()
    }

    pub(crate) fn context(services: Arc<Services>, request: ToolCallRequest) -> PipelineContext {
        let token = CancellationToken::new(request.tool.clone());
        PipelineContext::new(request, services, token)
    }

    #[test]
    fn standard_chain_order() {
        let pipeline = ToolCallPipeline::standard();
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "error_handling",
                "logging",
                "validation",
                "confirmation",
                "setup",
                "concurrency",
                "timeout",
                "result_conversion",
                "execution"
            ]
        );
        assert!(ToolCallPipeline::builder().build().is_ok());
    }

    #[tokio::test]
    async fn custom_middleware_runs_in_position() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ToolCallPipeline::builder()
            .insert_before(
                StageKind::Validation,
                Trace {
                    name: "before_validation",
                    seen: seen.clone(),
                },
            )
            .insert_after(
                StageKind::Concurrency,
                Trace {
                    name: "after_concurrency",
                    seen: seen.clone(),
                },
            )
            .build()
            .unwrap();

        let names = pipeline.stage_names();
        assert_eq!(names[2], "before_validation");
        assert_eq!(names[7], "after_concurrency");

        let calls = Arc::new(AtomicUsize::new(0));
        let services = Arc::new(Services::new(Arc::new(echo_registry(calls.clone()))));
        let mut ctx = context(
            services,
            ToolCallRequest::new("1", "echo", json!({"message": "hi"})),
        );
        let response = pipeline.execute(&mut ctx).await;

        assert_eq!(response.result().unwrap()["message"], "hi");
        assert_eq!(*seen.lock().unwrap(), vec!["before_validation", "after_concurrency"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cannot_wrap_error_handling_or_follow_execution() {
        let err = ToolCallPipeline::builder()
            .insert_before(StageKind::ErrorHandling, Fixed(StageKind::Custom))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::NotOutermost("fixed".into()));

        let err = ToolCallPipeline::builder()
            .insert_after(StageKind::Execution, Fixed(StageKind::Custom))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::NotInnermost("fixed".into()));
    }

    #[test]
    fn built_in_stages_must_be_unique_and_ordered() {
        let err = ToolCallPipeline::builder()
            .insert_after(StageKind::Validation, Fixed(StageKind::Logging))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::DuplicateStage(StageKind::Logging));

        let err = PipelineBuilder::empty()
            .push(ErrorHandlingStage)
            .push(LoggingStage)
            .push(ConfirmationStage)
            .push(ValidationStage)
            .push(SetupStage)
            .push(ConcurrencyStage)
            .push(TimeoutStage)
            .push(ResultConversionStage)
            .push(ExecutionStage)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::OutOfOrder {
                stage: StageKind::Confirmation,
                outer: StageKind::Validation,
            }
        );

        let err = PipelineBuilder::empty()
            .push(ErrorHandlingStage)
            .push(ExecutionStage)
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::MissingStage(StageKind::Logging));
    }

    #[test]
    fn replace_keeps_position() {
        let pipeline = ToolCallPipeline::builder()
            .replace(StageKind::Logging, Fixed(StageKind::Logging))
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_names()[1], "fixed");

        let err = ToolCallPipeline::builder()
            .insert_before(StageKind::Custom, Fixed(StageKind::Custom))
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::UnknownAnchor(StageKind::Custom));
    }
}
