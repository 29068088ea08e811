//! Grouping statistics tracking and reporting

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by the coalescing manager
#[derive(Debug, Default)]
pub struct GroupingStats {
    hits: AtomicU64,
    misses: AtomicU64,
    executions: AtomicU64,
    waits: AtomicU64,
    fail_opens: AtomicU64,
    soft_failures: AtomicU64,
    operation_failures: AtomicU64,
}

/// Point-in-time copy of [`GroupingStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingStatsSnapshot {
    /// Requests served from the cache
    pub hits: u64,
    /// Fetches that found nothing stored
    pub misses: u64,
    /// Times this process ran the wrapped operation while holding the lock
    pub executions: u64,
    /// Backoff sleeps spent waiting on another executor
    pub waits: u64,
    /// Requests that bypassed coordination because the store failed
    pub fail_opens: u64,
    /// Executor results cached with the short lifetime
    pub soft_failures: u64,
    /// Executor runs whose operation returned an error
    pub operation_failures: u64,
}

impl GroupingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail_open(&self) {
        self.fail_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_failure(&self) {
        self.soft_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_operation_failure(&self) {
        self.operation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GroupingStatsSnapshot {
        GroupingStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            fail_opens: self.fail_opens.load(Ordering::Relaxed),
            soft_failures: self.soft_failures.load(Ordering::Relaxed),
            operation_failures: self.operation_failures.load(Ordering::Relaxed),
        }
    }
}

impl GroupingStatsSnapshot {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
