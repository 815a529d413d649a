use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::ConcurrencyConfig;
use crate::error::{LimitScope, ToolError};

/// Fail-fast admission control over in-flight tool calls.
///
/// Checks and increments happen under one lock, so two racing callers can
/// never both take the last slot. Rejection is immediate: callers are told to
/// retry rather than queued. Clones share counters.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    max_concurrency: usize,
    per_tool_limits: HashMap<String, usize>,
    counters: Mutex<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    global: usize,
    per_tool: HashMap<String, usize>,
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::from_config(&ConcurrencyConfig::default())
    }
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrency: usize, per_tool_limits: HashMap<String, usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_concurrency,
                per_tool_limits,
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        Self::new(config.max_concurrency, config.per_tool_limits.clone())
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    /// Per-tool cap from config, falling back to the global cap.
    pub fn limit_for(&self, tool: &str) -> usize {
        self.shared
            .per_tool_limits
            .get(tool)
            .copied()
            .unwrap_or(self.shared.max_concurrency)
    }

    pub fn try_acquire(&self, tool: &str) -> Result<ConcurrencyPermit, ToolError> {
        self.try_acquire_within(tool, self.limit_for(tool))
    }

    /// Admit one call of `tool` if both its own counter stays within
    /// `tool_limit` and the global counter stays within `max_concurrency`.
    pub fn try_acquire_within(
        &self,
        tool: &str,
        tool_limit: usize,
    ) -> Result<ConcurrencyPermit, ToolError> {
        let mut counters = self.lock();

        let current = counters.per_tool.get(tool).copied().unwrap_or(0);
        if current >= tool_limit {
            warn!(tool, current, limit = tool_limit, "per-tool concurrency limit reached");
            return Err(ToolError::ConcurrencyExceeded {
                tool: tool.to_string(),
                scope: LimitScope::Tool,
                current,
                limit: tool_limit,
            });
        }

        let global = counters.global;
        if global >= self.shared.max_concurrency {
            warn!(
                tool,
                current = global,
                limit = self.shared.max_concurrency,
                "global concurrency limit reached"
            );
            return Err(ToolError::ConcurrencyExceeded {
                tool: tool.to_string(),
                scope: LimitScope::Global,
                current: global,
                limit: self.shared.max_concurrency,
            });
        }

        counters.global += 1;
        *counters.per_tool.entry(tool.to_string()).or_insert(0) += 1;
        debug!(tool, in_flight = counters.global, "concurrency slot acquired");

        Ok(ConcurrencyPermit {
            limiter: self.clone(),
            tool: tool.to_string(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.lock().global
    }

    pub fn in_flight_for(&self, tool: &str) -> usize {
        self.lock().per_tool.get(tool).copied().unwrap_or(0)
    }

    fn release(&self, tool: &str) {
        let mut counters = self.lock();
        counters.global = counters.global.saturating_sub(1);
        if let Some(count) = counters.per_tool.get_mut(tool) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counters.per_tool.remove(tool);
            }
        }
        debug!(tool, in_flight = counters.global, "concurrency slot released");
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.shared
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One admitted call. Dropping it gives the slot back, whatever way the call
/// ended.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    limiter: ConcurrencyLimiter,
    tool: String,
}

impl ConcurrencyPermit {
    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.limiter.release(&self.tool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn global_limit_fails_fast() {
        let limiter = ConcurrencyLimiter::new(1, HashMap::new());
        let first = limiter.try_acquire("echo").unwrap();
        let err = limiter.try_acquire("other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyExceeded);
        match err {
            ToolError::ConcurrencyExceeded {
                scope,
                current,
                limit,
                ..
            } => {
                assert_eq!(scope, LimitScope::Global);
                assert_eq!(current, 1);
                assert_eq!(limit, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        drop(first);
        assert!(limiter.try_acquire("other").is_ok());
    }

    #[test]
    fn per_tool_limit_is_independent_of_other_tools() {
        let limiter = ConcurrencyLimiter::new(10, HashMap::from([("build".to_string(), 2)]));
        let _a = limiter.try_acquire("build").unwrap();
        let _b = limiter.try_acquire("build").unwrap();

        let err = limiter.try_acquire("build").unwrap_err();
        assert!(matches!(
            err,
            ToolError::ConcurrencyExceeded {
                scope: LimitScope::Tool,
                limit: 2,
                ..
            }
        ));
        assert!(limiter.try_acquire("echo").is_ok());
    }

    #[test]
    fn explicit_tool_limit_overrides_config() {
        let limiter = ConcurrencyLimiter::new(10, HashMap::new());
        let _a = limiter.try_acquire_within("deploy", 1).unwrap();
        assert!(limiter.try_acquire_within("deploy", 1).is_err());
    }

    #[test]
    fn rejection_leaves_counters_untouched() {
        let limiter = ConcurrencyLimiter::new(1, HashMap::new());
        let _a = limiter.try_acquire("echo").unwrap();
        for _ in 0..5 {
            assert!(limiter.try_acquire("echo").is_err());
        }
        assert_eq!(limiter.in_flight(), 1);
        assert_eq!(limiter.in_flight_for("echo"), 1);
    }

    #[test]
    fn drop_restores_counters() {
        let limiter = ConcurrencyLimiter::default();
        {
            let _a = limiter.try_acquire("echo").unwrap();
            let _b = limiter.try_acquire("build").unwrap();
            assert_eq!(limiter.in_flight(), 2);
        }
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.in_flight_for("echo"), 0);
        assert_eq!(limiter.limit_for("echo"), 10);
    }

    #[tokio::test]
    async fn racing_callers_never_exceed_the_limit() {
        let limiter = ConcurrencyLimiter::new(3, HashMap::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let permit = limiter.try_acquire("echo");
                let admitted = permit.is_ok();
                assert!(limiter.in_flight() <= 3);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                drop(permit);
                admitted
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert!(admitted >= 3);
        assert_eq!(limiter.in_flight(), 0);
    }
}
