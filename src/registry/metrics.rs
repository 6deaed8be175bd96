//! Per-node rolling statistics.
//!
//! Counters are atomics so the request path and the probe loop can update them
//! without coordination. The error window is the only piece behind a lock, and
//! that lock is per node.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::registry::node::{NodeStatus, Role};

/// Fixed-size window of recent outcomes (`true` = success).
#[derive(Debug, Default)]
struct OutcomeWindow {
    outcomes: VecDeque<bool>,
    failures: usize,
}

impl OutcomeWindow {
    fn record(&mut self, success: bool, capacity: usize) {
        self.outcomes.push_back(success);
        if !success {
            self.failures += 1;
        }
        while self.outcomes.len() > capacity.max(1) {
            if let Some(false) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
    }

    fn sample(&self) -> ErrorSample {
        ErrorSample {
            failures: self.failures,
            samples: self.outcomes.len(),
        }
    }

    fn reset(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

/// Failure count over the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorSample {
    pub failures: usize,
    pub samples: usize,
}

impl ErrorSample {
    pub fn rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.failures as f64 / self.samples as f64
        }
    }
}

/// Counters as they stood right after an outcome was recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeCounters {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub errors: ErrorSample,
}

/// Live metrics for one node.
#[derive(Debug, Default)]
pub struct NodeMetrics {
    latency_ema_bits: AtomicU64,
    latency_samples: AtomicU64,
    active_connections: AtomicUsize,
    replication_lag_ms: AtomicU64,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    window: Mutex<OutcomeWindow>,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a latency sample into the moving average.
    pub fn record_latency(&self, latency_ms: f64, alpha: f64) {
        if self.latency_samples.fetch_add(1, Ordering::Relaxed) == 0 {
            self.latency_ema_bits
                .store(latency_ms.to_bits(), Ordering::Relaxed);
            return;
        }
        let mut current = self.latency_ema_bits.load(Ordering::Relaxed);
        loop {
            let ema = f64::from_bits(current);
            let next = alpha * latency_ms + (1.0 - alpha) * ema;
            match self.latency_ema_bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn latency_ms(&self) -> f64 {
        f64::from_bits(self.latency_ema_bits.load(Ordering::Relaxed))
    }

    pub fn has_latency(&self) -> bool {
        self.latency_samples.load(Ordering::Relaxed) > 0
    }

    /// Record a success or failure and return the resulting counters.
    pub fn record_outcome(&self, success: bool, window_capacity: usize) -> OutcomeCounters {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let (failures, successes) = if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            let s = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            (0, s)
        } else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
            let f = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            (f, 0)
        };

        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.record(success, window_capacity);

        OutcomeCounters {
            consecutive_failures: failures,
            consecutive_successes: successes,
            errors: window.sample(),
        }
    }

    /// Current counters without recording anything.
    pub fn counters(&self) -> OutcomeCounters {
        OutcomeCounters {
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.consecutive_successes.load(Ordering::Relaxed),
            errors: self.error_sample(),
        }
    }

    pub fn error_sample(&self) -> ErrorSample {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample()
    }

    /// Clear streaks and the error window after recovery.
    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    pub fn acquire_connection(&self) -> usize {
        self.active_connections.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the number of connections still in flight.
    pub fn release_connection(&self) -> usize {
        self.active_connections
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1)
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    pub fn set_replication_lag_ms(&self, lag_ms: u64) {
        self.replication_lag_ms.store(lag_ms, Ordering::Relaxed);
    }

    pub fn replication_lag_ms(&self) -> u64 {
        self.replication_lag_ms.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of a node and its metrics, for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub role: Role,
    pub region: String,
    pub weight: u32,
    pub status: NodeStatus,
    pub latency_ms: f64,
    pub error_rate: f64,
    pub active_connections: usize,
    pub estimated_replication_lag_ms: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_requests: u64,
    pub total_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_ema() {
        let m = NodeMetrics::new();
        assert!(!m.has_latency());

        m.record_latency(100.0, 0.5);
        assert_eq!(m.latency_ms(), 100.0);

        m.record_latency(200.0, 0.5);
        assert_eq!(m.latency_ms(), 150.0);
    }

    #[test]
    fn test_error_window_trims_to_capacity() {
        let m = NodeMetrics::new();
        for _ in 0..4 {
            m.record_outcome(false, 4);
        }
        assert_eq!(m.error_sample(), ErrorSample { failures: 4, samples: 4 });

        // Two successes push two failures out of the window.
        m.record_outcome(true, 4);
        let counters = m.record_outcome(true, 4);
        assert_eq!(counters.errors, ErrorSample { failures: 2, samples: 4 });
        assert_eq!(counters.errors.rate(), 0.5);
        assert_eq!(counters.consecutive_successes, 2);
        assert_eq!(counters.consecutive_failures, 0);
    }

    #[test]
    fn test_streaks_reset_each_other() {
        let m = NodeMetrics::new();
        m.record_outcome(true, 10);
        m.record_outcome(true, 10);
        let c = m.record_outcome(false, 10);
        assert_eq!(c.consecutive_failures, 1);
        assert_eq!(c.consecutive_successes, 0);
        assert_eq!(m.total_requests(), 3);
        assert_eq!(m.total_failures(), 1);

        m.reset_failures();
        assert_eq!(m.consecutive_failures(), 0);
        assert_eq!(m.error_sample().samples, 0);
    }
}
