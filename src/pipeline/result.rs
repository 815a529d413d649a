use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::error;

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};
use crate::error::ToolError;
use crate::protocol::{ResponseBody, ToolCallResponse};
use crate::schema;
use crate::size::SizeLimit;

/// Checks the handler's result against the tool's declared result schema and
/// the result size limit, and shapes it into a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultConversionStage;

#[async_trait]
impl Middleware for ResultConversionStage {
    fn name(&self) -> &str {
        "result_conversion"
    }

    fn stage(&self) -> StageKind {
        StageKind::ResultConversion
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let response = next.run(ctx).await?;
        let ToolCallResponse { id, body } = response;
        let value = match body {
            ResponseBody::Result(value) => value,
            body @ ResponseBody::Error(_) => return Ok(ToolCallResponse { id, body }),
        };

        let tool = ctx.tool()?;
        if let Some(result_schema) = &tool.result_schema {
            let violations = schema::validate(result_schema, &value);
            if let Some(first) = violations.first() {
                error!(tool = %tool.name, violation = %first, "result does not match declared schema");
                return Err(ToolError::internal(format!(
                    "{} returned a result that does not match its schema ({first})",
                    tool.name
                )));
            }
        }

        let shaped = shape(value);
        ctx.services.sizes.check(SizeLimit::Result, &shaped)?;

        Ok(ToolCallResponse {
            id,
            body: ResponseBody::Result(shaped),
        })
    }
}

fn shape(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ "value": other }),
    }
}
