use async_trait::async_trait;
use tracing::debug;

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};

/// Binds the effective timeout and concurrency limit for this call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupStage;

#[async_trait]
impl Middleware for SetupStage {
    fn name(&self) -> &str {
        "setup"
    }

    fn stage(&self) -> StageKind {
        StageKind::Setup
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let tool = ctx.tool()?;
        let services = &ctx.services;

        let timeout = services.timeouts.resolve(&tool.name, tool.timeout);
        let limit = tool
            .max_concurrency
            .unwrap_or_else(|| services.limiter.limit_for(&tool.name));
        debug!(tool = %tool.name, timeout_ms = timeout.as_millis() as u64, limit, "call bound");

        ctx.timeout = Some(timeout);
        ctx.concurrency_limit = Some(limit);
        next.run(ctx).await
    }
}
