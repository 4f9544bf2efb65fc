//! Pipeline event counters
//!
//! An explicitly owned collector injected into handlers via `Arc`, replacing
//! any notion of process-wide static counters. Counters are plain atomics;
//! `snapshot` gives a consistent-enough view for tests and diagnostics, and
//! `reset` returns every counter to zero for teardown between test phases.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for events observed by the handler chain
///
/// Policy-level counters (breaker transitions, bulkhead rejections) live on
/// the policy instances themselves; this collector sees what the chain sees.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    requests_total: AtomicU64,
    failures_total: AtomicU64,
    timeouts_total: AtomicU64,
    cancellations_total: AtomicU64,
    token_refreshes_total: AtomicU64,
    unauthorized_retries_total: AtomicU64,
}

/// Point-in-time view of the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub failures_total: u64,
    pub timeouts_total: u64,
    pub cancellations_total: u64,
    pub token_refreshes_total: u64,
    pub unauthorized_retries_total: u64,
}

impl PipelineMetrics {
    /// Create a collector with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_refresh(&self) {
        self.token_refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthorized_retry(&self) {
        self.unauthorized_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Acquire),
            failures_total: self.failures_total.load(Ordering::Acquire),
            timeouts_total: self.timeouts_total.load(Ordering::Acquire),
            cancellations_total: self.cancellations_total.load(Ordering::Acquire),
            token_refreshes_total: self.token_refreshes_total.load(Ordering::Acquire),
            unauthorized_retries_total: self.unauthorized_retries_total.load(Ordering::Acquire),
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        self.requests_total.store(0, Ordering::Release);
        self.failures_total.store(0, Ordering::Release);
        self.timeouts_total.store(0, Ordering::Release);
        self.cancellations_total.store(0, Ordering::Release);
        self.token_refreshes_total.store(0, Ordering::Release);
        self.unauthorized_retries_total.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let metrics = PipelineMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_failure();
        metrics.record_token_refresh();
        metrics.record_unauthorized_retry();
        metrics.record_timeout();
        metrics.record_cancellation();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.failures_total, 1);
        assert_eq!(snap.token_refreshes_total, 1);
        assert_eq!(snap.unauthorized_retries_total, 1);
        assert_eq!(snap.timeouts_total, 1);
        assert_eq!(snap.cancellations_total, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot {
            requests_total: 0,
            failures_total: 0,
            timeouts_total: 0,
            cancellations_total: 0,
            token_refreshes_total: 0,
            unauthorized_retries_total: 0,
        });
    }
}
