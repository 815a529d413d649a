use async_trait::async_trait;

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};

/// Admits the call under the global and per-tool limits, or rejects it at
/// once. The permit lives until the inner stages return.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrencyStage;

#[async_trait]
impl Middleware for ConcurrencyStage {
    fn name(&self) -> &str {
        "concurrency"
    }

    fn stage(&self) -> StageKind {
        StageKind::Concurrency
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let tool = ctx.tool()?;
        let limiter = ctx.services.limiter.clone();
        let limit = ctx
            .concurrency_limit
            .unwrap_or_else(|| limiter.limit_for(&tool.name));

        let _permit = limiter.try_acquire_within(&tool.name, limit)?;
        next.run(ctx).await
    }
}
