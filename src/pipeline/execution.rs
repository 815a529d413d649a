use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};
use crate::error::ToolError;
use crate::protocol::ToolCallResponse;
use crate::tools::ToolContext;

/// Invokes the handler. Innermost stage: `next` is never called.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionStage;

#[async_trait]
impl Middleware for ExecutionStage {
    fn name(&self) -> &str {
        "execution"
    }

    fn stage(&self) -> StageKind {
        StageKind::Execution
    }

    async fn handle(&self, ctx: &mut PipelineContext, _next: Next<'_>) -> StageResult {
        ctx.cancellation.check()?;
        let tool = ctx.tool()?;

        let handler_ctx = ToolContext::new(
            ctx.request.id.clone(),
            tool.name.clone(),
            ctx.cancellation.clone(),
            ctx.services.progress.clone(),
        );

        debug!(tool = %tool.name, request_id = %ctx.request.id, "executing tool");
        let call = AssertUnwindSafe(tool.handler.call(&ctx.request.params, handler_ctx)).catch_unwind();

        let value = tokio::select! {
            outcome = call => match outcome {
                Ok(result) => result?,
                Err(_) => {
                    error!(tool = %tool.name, "tool handler panicked");
                    return Err(ToolError::internal(format!("{} handler panicked", tool.name)));
                }
            },
            _ = ctx.cancellation.cancelled() => {
                return Err(ToolError::cancelled(ctx.cancellation.label()));
            }
        };

        Ok(ToolCallResponse::success(ctx.request.id.clone(), value))
    }
}
