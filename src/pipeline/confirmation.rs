use async_trait::async_trait;
use tracing::info;

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};
use crate::error::ToolError;

/// Holds back tools flagged `requires_confirmation` until the caller has
/// asserted assent and the confirmation provider agrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmationStage;

#[async_trait]
impl Middleware for ConfirmationStage {
    fn name(&self) -> &str {
        "confirmation"
    }

    fn stage(&self) -> StageKind {
        StageKind::Confirmation
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let tool = ctx.tool()?;
        if !tool.flags.requires_confirmation {
            return next.run(ctx).await;
        }

        if !ctx.request.confirmed {
            info!(tool = %tool.name, request_id = %ctx.request.id, "confirmation required");
            return Err(ToolError::permission_denied(
                &tool.name,
                "this tool requires confirmation; resend with confirmed set to true",
            ));
        }

        let provider = ctx.services.confirmation.clone();
        let approved = tokio::select! {
            answer = provider.confirm(&ctx.request, &tool) => answer?,
            _ = ctx.cancellation.cancelled() => {
                return Err(ToolError::cancelled(ctx.cancellation.label()));
            }
        };

        if !approved {
            info!(tool = %tool.name, request_id = %ctx.request.id, "confirmation refused");
            return Err(ToolError::permission_denied(&tool.name, "confirmation was refused"));
        }

        next.run(ctx).await
    }
}
