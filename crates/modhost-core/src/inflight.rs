//! Per-module in-flight call counting, used to drain a module before unload.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

#[derive(Default)]
struct Counter {
    calls: AtomicUsize,
    /// Woken when `calls` drops to zero.
    idle: Notify,
}

#[derive(Default)]
pub struct InflightTracker {
    counters: DashMap<String, Arc<Counter>>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a call into `module` until the returned guard drops.
    pub fn enter(&self, module: &str) -> InflightGuard {
        let counter = self
            .counters
            .entry(module.to_string())
            .or_default()
            .value()
            .clone();
        counter.calls.fetch_add(1, Ordering::AcqRel);
        InflightGuard { counter }
    }

    pub fn count(&self, module: &str) -> usize {
        self.counters
            .get(module)
            .map(|c| c.calls.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Wait until `module` has no calls in flight, or `timeout` passes.
    /// Returns whether the module drained.
    pub async fn drain(&self, module: &str, timeout: Duration) -> bool {
        let Some(counter) = self.counters.get(module).map(|c| c.value().clone()) else {
            return true;
        };
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = counter.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            if counter.calls.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return counter.calls.load(Ordering::Acquire) == 0;
            }
        }
    }

    pub fn forget(&self, module: &str) {
        self.counters.remove(module);
    }
}

pub struct InflightGuard {
    counter: Arc<Counter>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.counter.calls.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.counter.idle.notify_waiters();
        }
    }
}
