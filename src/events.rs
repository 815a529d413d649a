use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ToolError};
use crate::protocol::RequestId;

/// How a tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Succeeded,
    /// Rejected before admission: unknown tool, bad params, oversized input.
    Invalid,
    /// Refused confirmation or admission.
    Rejected,
    Cancelled,
    TimedOut,
    Failed,
}

impl CallOutcome {
    pub fn from_error(error: &ToolError) -> Self {
        match error.kind() {
            ErrorKind::NotFound | ErrorKind::InvalidParams => Self::Invalid,
            ErrorKind::PermissionDenied | ErrorKind::ConcurrencyExceeded => Self::Rejected,
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::Timeout => Self::TimedOut,
            ErrorKind::Internal => Self::Failed,
        }
    }
}

/// One structured record per completed call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: RequestId,
    pub tool: String,
    pub duration_ms: u64,
    pub outcome: CallOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

/// Where call records go. Implementations must not block the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: LogEvent);
}

/// Writes each record through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: LogEvent) {
        match event.error_code {
            None => info!(
                request_id = %event.request_id,
                tool = %event.tool,
                duration_ms = event.duration_ms,
                "tool call succeeded"
            ),
            Some(code) => warn!(
                request_id = %event.request_id,
                tool = %event.tool,
                duration_ms = event.duration_ms,
                outcome = ?event.outcome,
                code,
                "tool call failed"
            ),
        }
    }
}

/// Forwards records to a bounded channel, for UIs and tests. A full channel
/// holds the finishing call until the receiver catches up.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<LogEvent>,
}

impl ChannelEventSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<LogEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: LogEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Progress reported by a running handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub request_id: RequestId,
    pub tool: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Progress over a bounded channel. Reporting never blocks the handler:
/// updates that don't fit are dropped and counted.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressUpdate>,
    dropped: Arc<AtomicU64>,
}

impl ChannelProgressSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Updates discarded because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, update: ProgressUpdate) {
        if let Err(err) = self.tx.try_send(update) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "receiver dropped",
            };
            debug!(reason, dropped, "progress update dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(error_code: Option<i32>) -> LogEvent {
        LogEvent {
            timestamp: Utc::now(),
            request_id: "1".into(),
            tool: "echo".into(),
            duration_ms: 3,
            outcome: if error_code.is_some() {
                CallOutcome::Failed
            } else {
                CallOutcome::Succeeded
            },
            error_code,
        }
    }

    #[test]
    fn outcome_follows_error_kind() {
        assert_eq!(
            CallOutcome::from_error(&ToolError::tool_not_found("x")),
            CallOutcome::Invalid
        );
        assert_eq!(
            CallOutcome::from_error(&ToolError::permission_denied("x", "no")),
            CallOutcome::Rejected
        );
        assert_eq!(
            CallOutcome::from_error(&ToolError::cancelled("x")),
            CallOutcome::Cancelled
        );
        assert_eq!(
            CallOutcome::from_error(&ToolError::internal("boom")),
            CallOutcome::Failed
        );
    }

    #[test]
    fn log_event_serializes_camel_case() {
        let json = serde_json::to_value(event(Some(-32603))).unwrap();
        assert_eq!(json["requestId"], "1");
        assert_eq!(json["durationMs"], 3);
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["errorCode"], -32603);

        let json = serde_json::to_value(event(None)).unwrap();
        assert!(json.get("errorCode").is_none());
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelEventSink::new(8);
        sink.emit(event(None)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.tool, "echo");
        assert_eq!(received.outcome, CallOutcome::Succeeded);
    }

    #[tokio::test]
    async fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelEventSink::new(8);
        drop(rx);
        sink.emit(event(None)).await;
        TracingEventSink.emit(event(Some(-32801))).await;
    }

    #[test]
    fn progress_channel() {
        let (sink, mut rx) = ChannelProgressSink::new(8);
        sink.report(update(1.0));
        let update = rx.try_recv().unwrap();
        assert_eq!(update.total, Some(4.0));
        assert_eq!(sink.dropped(), 0);
        NoProgress.report(update);
    }

    fn update(progress: f64) -> ProgressUpdate {
        ProgressUpdate {
            request_id: RequestId::Number(1),
            tool: "create_project".into(),
            progress,
            total: Some(4.0),
            message: Some("rendering templates".into()),
        }
    }

    #[test]
    fn full_progress_channel_drops_instead_of_growing() {
        let (sink, mut rx) = ChannelProgressSink::new(2);
        for step in 1..=5 {
            sink.report(update(step as f64));
        }
        assert_eq!(sink.dropped(), 3);
        assert_eq!(rx.try_recv().unwrap().progress, 1.0);
        assert_eq!(rx.try_recv().unwrap().progress, 2.0);
        assert!(rx.try_recv().is_err());

        drop(rx);
        sink.report(update(6.0));
        assert_eq!(sink.dropped(), 4);
    }

    #[tokio::test]
    async fn full_event_channel_waits_for_the_receiver() {
        let (sink, mut rx) = ChannelEventSink::new(1);
        sink.emit(event(None)).await;

        let pending = tokio::spawn({
            let sink = sink.clone();
            async move { sink.emit(event(Some(-32801))).await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await.unwrap().error_code, None);
        pending.await.unwrap();
        assert_eq!(rx.recv().await.unwrap().error_code, Some(-32801));
    }
}
