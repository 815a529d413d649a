use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error};

use super::error_handling::panic_message;
use super::{Middleware, Next, PipelineContext, StageKind, StageResult};
use crate::convert::ErrorConverter;
use crate::error::ToolError;
use crate::events::{CallOutcome, LogEvent};

/// Emits one [`LogEvent`] per call, whatever the outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStage;

#[async_trait]
impl Middleware for LoggingStage {
    fn name(&self) -> &str {
        "logging"
    }

    fn stage(&self) -> StageKind {
        StageKind::Logging
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let started = Instant::now();
        // A panicking inner stage still gets a record; it surfaces as Internal.
        let result = match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    tool = %ctx.request.tool,
                    request_id = %ctx.request.id,
                    panic = panic_message(panic.as_ref()),
                    "pipeline stage panicked"
                );
                Err(ToolError::internal("a pipeline stage panicked"))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, error_code) = match &result {
            Ok(response) => match response.error() {
                None => (CallOutcome::Succeeded, None),
                Some(error) => (CallOutcome::Failed, Some(error.code)),
            },
            Err(error) => (
                CallOutcome::from_error(error),
                Some(ErrorConverter::code_for(error.kind()).code()),
            ),
        };

        let event = LogEvent {
            timestamp: Utc::now(),
            request_id: ctx.request.id.clone(),
            tool: ctx.request.tool.clone(),
            duration_ms,
            outcome,
            error_code,
        };
        debug!(
            request_id = %event.request_id,
            tool = %event.tool,
            duration_ms,
            outcome = ?outcome,
            "tool call finished"
        );
        ctx.services.events.emit(event).await;

        result
    }
}
