//! Engine runtime metrics.
//!
//! Counters are plain atomics updated with relaxed ordering. A
//! [`MetricsSnapshot`] copies them one by one, so it is not a transactional
//! view of the engine.

use crate::cache::CacheStats;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters shared by every evaluation.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    evaluations: AtomicU64,
    matched: AtomicU64,
    cancelled: AtomicU64,
    total_eval_nanos: AtomicU64,
    rule_reloads: AtomicU64,
    store_failures: AtomicU64,
    scope_errors: AtomicU64,
    broken_patterns: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_evaluation(&self, elapsed: Duration, matched: bool) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.matched.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_eval_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rule_reload(&self) {
        self.rule_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scope_error(&self) {
        self.scope_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_broken_pattern(&self) {
        self.broken_patterns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            total_eval_time: Duration::from_nanos(self.total_eval_nanos.load(Ordering::Relaxed)),
            rule_reloads: self.rule_reloads.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            scope_errors: self.scope_errors.load(Ordering::Relaxed),
            broken_patterns: self.broken_patterns.load(Ordering::Relaxed),
            ..Default::default()
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.evaluations,
            &self.matched,
            &self.cancelled,
            &self.total_eval_nanos,
            &self.rule_reloads,
            &self.store_failures,
            &self.scope_errors,
            &self.broken_patterns,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Completed evaluations, matched or not. Cancelled ones are excluded.
    pub evaluations: u64,
    pub matched: u64,
    pub cancelled: u64,
    pub total_eval_time: Duration,
    pub rule_reloads: u64,
    pub store_failures: u64,
    pub scope_errors: u64,
    pub broken_patterns: u64,
    /// Audit counters are filled in from the engine's audit queue.
    pub audit_enqueued: u64,
    pub audit_dropped: u64,
    pub audit_sink_failures: u64,
}

impl MetricsSnapshot {
    pub fn average_latency(&self) -> Duration {
        if self.evaluations == 0 {
            return Duration::ZERO;
        }
        let average = self.total_eval_time.as_nanos() / u128::from(self.evaluations);
        Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX))
    }

    pub fn match_rate(&self) -> f64 {
        if self.evaluations == 0 {
            return 0.0;
        }
        self.matched as f64 / self.evaluations as f64
    }
}

/// Statistics of the three engine caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCacheStats {
    pub patterns: CacheStats,
    pub scopes: CacheStats,
    pub rules: CacheStats,
}
