use async_trait::async_trait;
use tracing::warn;

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};
use crate::error::ToolError;

/// Races the rest of the chain against the call's time budget. On expiry the
/// request token is cancelled so cooperative handlers can stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutStage;

#[async_trait]
impl Middleware for TimeoutStage {
    fn name(&self) -> &str {
        "timeout"
    }

    fn stage(&self) -> StageKind {
        StageKind::Timeout
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let services = ctx.services.clone();
        let token = ctx.cancellation.clone();
        let tool = ctx.request.tool.clone();
        let duration = ctx
            .timeout
            .unwrap_or_else(|| services.timeouts.default_timeout());

        let result = services.timeouts.run(&tool, duration, next.run(ctx)).await;
        if let Err(ToolError::Timeout { .. }) = &result {
            warn!(tool = %tool, timeout_ms = duration.as_millis() as u64, "tool call timed out");
            token.cancel();
        }
        result
    }
}
