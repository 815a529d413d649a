use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, warn};

use super::{Middleware, Next, PipelineContext, StageKind, StageResult};
use crate::convert::ErrorConverter;
use crate::error::{ErrorKind, ToolError};
use crate::protocol::ToolCallResponse;

/// Outermost stage and the only place errors become protocol errors. Never
/// returns `Err`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandlingStage;

#[async_trait]
impl Middleware for ErrorHandlingStage {
    fn name(&self) -> &str {
        "error_handling"
    }

    fn stage(&self) -> StageKind {
        StageKind::ErrorHandling
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> StageResult {
        let outcome = AssertUnwindSafe(next.run(ctx)).catch_unwind().await;

        let error = match outcome {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(error)) => error,
            Err(panic) => {
                error!(
                    tool = %ctx.request.tool,
                    request_id = %ctx.request.id,
                    panic = panic_message(panic.as_ref()),
                    "pipeline stage panicked"
                );
                ToolError::internal("a pipeline stage panicked")
            }
        };

        if error.kind() == ErrorKind::Internal {
            error!(
                tool = %ctx.request.tool,
                request_id = %ctx.request.id,
                error = %error,
                chain = %source_chain(&error),
                "internal failure"
            );
        } else {
            warn!(
                tool = %ctx.request.tool,
                request_id = %ctx.request.id,
                kind = %error.kind(),
                error = %error,
                "tool call failed"
            );
        }

        let converted = ErrorConverter::new().convert(&error, Some(&ctx.request.tool));
        Ok(ToolCallResponse::failure(Some(ctx.request.id.clone()), converted))
    }
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn source_chain(error: &dyn std::error::Error) -> String {
    let mut parts = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_lists_every_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "pubspec.yaml missing");
        let err = ToolError::internal_from("could not read manifest", io);
        assert_eq!(source_chain(&err), "pubspec.yaml missing");
        assert_eq!(source_chain(&ToolError::internal("x")), "");
    }

    #[test]
    fn panic_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(s.as_ref()), "bang");
        let s: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(s.as_ref()), "non-string panic payload");
    }
}
