use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ToolError;
use crate::protocol::{RequestId, ToolCallRequest};
use crate::tools::ToolDefinition;

/// Decides whether a confirmation-gated call may proceed. Only consulted
/// after the caller has asserted `confirmed: true`; may wait on a human for
/// as long as it likes; the pipeline races it against cancellation.
#[async_trait]
pub trait ConfirmationProvider: Send + Sync {
    async fn confirm(
        &self,
        request: &ToolCallRequest,
        tool: &ToolDefinition,
    ) -> Result<bool, ToolError>;
}

/// Trusts the caller's `confirmed` flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerAssertion;

#[async_trait]
impl ConfirmationProvider for CallerAssertion {
    async fn confirm(
        &self,
        _request: &ToolCallRequest,
        _tool: &ToolDefinition,
    ) -> Result<bool, ToolError> {
        Ok(true)
    }
}

/// A pending question for whoever drains the prompt channel.
#[derive(Debug)]
pub struct ConfirmationPrompt {
    pub request_id: RequestId,
    pub tool: String,
    pub description: String,
    pub params: Value,
    reply: oneshot::Sender<bool>,
}

impl ConfirmationPrompt {
    pub fn approve(self) {
        let _ = self.reply.send(true);
    }

    pub fn deny(self) {
        let _ = self.reply.send(false);
    }
}

/// Forwards each confirmation to a channel and waits for the answer. A
/// prompt dropped without an answer, or a closed channel, counts as a refusal.
#[derive(Debug, Clone)]
pub struct ChannelConfirmation {
    tx: mpsc::Sender<ConfirmationPrompt>,
}

impl ChannelConfirmation {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ConfirmationPrompt>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConfirmationProvider for ChannelConfirmation {
    async fn confirm(
        &self,
        request: &ToolCallRequest,
        tool: &ToolDefinition,
    ) -> Result<bool, ToolError> {
        let (reply, answer) = oneshot::channel();
        let prompt = ConfirmationPrompt {
            request_id: request.id.clone(),
            tool: tool.name.clone(),
            description: tool.description.clone(),
            params: request.params.clone(),
            reply,
        };
        if self.tx.send(prompt).await.is_err() {
            debug!(tool = %tool.name, "confirmation channel closed, refusing");
            return Ok(false);
        }
        Ok(answer.await.unwrap_or(false))
    }
}
