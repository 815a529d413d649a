use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};
use crate::error::ToolError;
use crate::schema;
use crate::size::SizeLimit;

/// Rejects anything malformed before the handler could see it: unknown
/// tools, oversized params or messages, schema-violating params.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationStage;

#[async_trait]
impl Middleware for ValidationStage {
    fn name(&self) -> &str {
        "validation"
    }

    fn stage(&self) -> StageKind {
        StageKind::Validation
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let services = ctx.services.clone();

        let tool = services.registry.lookup(&ctx.request.tool)?;

        // Params first so an oversized payload is blamed on the params.
        services.sizes.check(SizeLimit::Parameter, &ctx.request.params)?;
        services.sizes.check(SizeLimit::Message, &ctx.request)?;

        let violations = schema::validate(&tool.params_schema, &ctx.request.params);
        if !violations.is_empty() {
            debug!(tool = %tool.name, count = violations.len(), "params failed schema validation");
            let message = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let fields = violations.iter().map(|v| v.path.clone()).collect();
            let detail: Vec<_> = violations
                .iter()
                .map(|v| json!({ "path": v.path, "message": v.message }))
                .collect();
            return Err(ToolError::invalid_params(message, fields)
                .with_detail(json!({ "violations": detail })));
        }

        ctx.tool = Some(tool);
        next.run(ctx).await
    }
}
