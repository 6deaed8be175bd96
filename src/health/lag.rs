//! Replication lag estimation.
//!
//! The primary's probe reports the newest committed transaction; a replica's
//! reports the newest one it has replayed. The difference is the lag. An
//! engine-reported lag, when present, is used as-is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::ProbeReport;
use crate::registry::ReplicaNode;

const UNKNOWN: u64 = 0;

#[derive(Debug, Default)]
pub struct LagEstimator {
    primary_commit_ms: AtomicU64,
}

impl LagEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the primary's commit position. Never moves backwards.
    pub fn record_primary(&self, report: &ProbeReport) {
        if let Some(at) = report.last_commit {
            self.primary_commit_ms
                .fetch_max(epoch_ms(at), Ordering::AcqRel);
        }
    }

    pub fn primary_commit_ms(&self) -> Option<u64> {
        match self.primary_commit_ms.load(Ordering::Acquire) {
            UNKNOWN => None,
            ms => Some(ms),
        }
    }

    /// Lag for `node` from its latest probe, or `None` if the probe carried no
    /// usable signal.
    pub fn estimate(&self, node: &ReplicaNode, report: &ProbeReport) -> Option<u64> {
        if node.is_primary() {
            return Some(0);
        }
        if let Some(lag) = report.replication_lag {
            return Some(u64::try_from(lag.as_millis()).unwrap_or(u64::MAX));
        }
        let replica_ms = epoch_ms(report.last_commit?);
        let primary_ms = self.primary_commit_ms()?;
        Some(primary_ms.saturating_sub(replica_ms))
    }
}

fn epoch_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(UNKNOWN)
}
