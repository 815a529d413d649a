use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::ToolError;
use crate::protocol::RequestId;

/// Cooperative cancellation signal for one tool call.
///
/// Cancelling only signals. Handlers poll [`check`](Self::check) at safe
/// points or await [`cancelled`](Self::cancelled), and clean up their own
/// external resources. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    signal: tokio_util::sync::CancellationToken,
    requested: Arc<AtomicBool>,
    label: Arc<str>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new("operation")
    }
}

impl CancellationToken {
    /// `label` names the operation in the `Cancelled` error this token raises.
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            signal: tokio_util::sync::CancellationToken::new(),
            requested: Arc::new(AtomicBool::new(false)),
            label: label.into(),
        }
    }

    /// Request cancellation. Returns true only for the call that actually
    /// transitioned the token; later calls are no-ops.
    pub fn cancel(&self) -> bool {
        if self.signal.is_cancelled() || self.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.signal.cancel();
        debug!(operation = %self.label, "cancellation requested");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Errors with `Cancelled` on the first and every later check after
    /// cancellation.
    pub fn check(&self) -> Result<(), ToolError> {
        if self.is_cancelled() {
            Err(ToolError::cancelled(&*self.label))
        } else {
            Ok(())
        }
    }

    /// Resolves once cancelled. Immediately if already cancelled.
    pub async fn cancelled(&self) {
        self.signal.cancelled().await
    }

    /// A token cancelled together with this one, but which can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            signal: self.signal.child_token(),
            requested: Arc::new(AtomicBool::new(false)),
            label: self.label.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Lookup table from request id to its in-flight token so an external
/// "cancel by id" can reach a running pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    entries: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `token` under `id` until the returned guard drops. Fails if the
    /// id is already in flight.
    pub fn register(
        &self,
        id: RequestId,
        token: CancellationToken,
    ) -> Result<Registration, ToolError> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(ToolError::invalid_params(
                format!("request id {id} is already in flight"),
                vec!["id".into()],
            ));
        }
        entries.insert(id.clone(), token);
        Ok(Registration {
            id,
            registry: self.clone(),
        })
    }

    /// Cancel the in-flight request with this id. Returns false if unknown.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let token = self.lock().get(id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &RequestId) -> Option<CancellationToken> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its registry entry on drop, on every exit path.
#[derive(Debug)]
pub struct Registration {
    id: RequestId,
    registry: CancellationRegistry,
}

impl Registration {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn check_passes_until_cancelled() {
        let token = CancellationToken::new("echo");
        assert!(token.check().is_ok());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn check_fails_every_time_after_cancel() {
        let token = CancellationToken::new("echo");
        token.cancel();
        for _ in 0..3 {
            let err = token.check().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Cancelled);
            assert_eq!(err.to_string(), "echo was cancelled");
        }
    }

    #[test]
    fn cancel_twice_is_a_no_op() {
        let token = CancellationToken::new("echo");
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_signal() {
        let token = CancellationToken::new("echo");
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(!token.cancel());
    }

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = CancellationToken::new("build");
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
        assert!(!other.cancel());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancellationToken::new("echo");
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("should resolve immediately");
    }

    #[tokio::test]
    async fn cancelled_wakes_waiter() {
        let token = CancellationToken::new("echo");
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn registry_cancels_by_id() {
        let registry = CancellationRegistry::new();
        let token = CancellationToken::new("echo");
        let _reg = registry.register("1".into(), token.clone()).unwrap();

        assert!(registry.cancel(&"1".into()));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(&"2".into()));
    }

    #[test]
    fn registration_removes_entry_on_drop() {
        let registry = CancellationRegistry::new();
        {
            let _reg = registry
                .register(RequestId::Number(1), CancellationToken::default())
                .unwrap();
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_in_flight_id_rejected() {
        let registry = CancellationRegistry::new();
        let _reg = registry
            .register("dup".into(), CancellationToken::default())
            .unwrap();
        let err = registry
            .register("dup".into(), CancellationToken::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn string_and_numeric_ids_are_distinct() {
        let registry = CancellationRegistry::new();
        let _a = registry
            .register(RequestId::Number(1), CancellationToken::default())
            .unwrap();
        let _b = registry
            .register("1".into(), CancellationToken::default())
            .unwrap();
        assert_eq!(registry.len(), 2);
    }
}
