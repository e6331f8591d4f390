//! Counters shared between the diagnostics handlers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How many warnings are kept.
const WARNING_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRecord {
    pub at: DateTime<Utc>,
    pub source: String,
    pub message: String,
}

#[derive(Debug)]
pub struct DiagnosticsStats {
    started_at: DateTime<Utc>,
    pings: AtomicU64,
    heartbeats: AtomicU64,
    warnings: Mutex<VecDeque<WarningRecord>>,
}

impl DiagnosticsStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            pings: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            warnings: Mutex::new(VecDeque::with_capacity(WARNING_CAPACITY)),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn record_ping(&self) -> u64 {
        self.pings.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn record_heartbeat(&self) -> u64 {
        self.heartbeats.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// Keep the newest warnings; the oldest is dropped at capacity.
    pub fn record_warning(&self, source: impl Into<String>, message: impl Into<String>) {
        let mut warnings = self.warnings.lock();
        if warnings.len() == WARNING_CAPACITY {
            warnings.pop_front();
        }
        warnings.push_back(WarningRecord {
            at: Utc::now(),
            source: source.into(),
            message: message.into(),
        });
    }

    /// Newest first.
    pub fn recent_warnings(&self) -> Vec<WarningRecord> {
        self.warnings.lock().iter().rev().cloned().collect()
    }
}

impl Default for DiagnosticsStats {
    fn default() -> Self {
        Self::new()
    }
}
