//! Replica node abstraction.
//!
//! # Responsibilities
//! - Represent a single database endpoint (the primary or a read replica)
//! - Track active connections (for Least Connections LB)
//! - Hold the health status shared by probes and the request path
//! - Signal when a draining node has no queries left in flight

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use url::Url;

use crate::registry::metrics::{NodeMetrics, NodeSnapshot};

/// Stable node identifier.
pub type NodeId = String;

/// Node role. Exactly one node in a registry is the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Replica => "replica",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Healthy = 0,
    Degraded = 1,
    Unhealthy = 2,
    /// Accepts no new traffic; in-flight queries finish.
    Draining = 3,
}

impl From<u8> for NodeStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => NodeStatus::Healthy,
            1 => NodeStatus::Degraded,
            2 => NodeStatus::Unhealthy,
            _ => NodeStatus::Draining,
        }
    }
}

impl NodeStatus {
    /// Healthy and Degraded nodes may receive new queries.
    pub fn is_routable(self) -> bool {
        matches!(self, NodeStatus::Healthy | NodeStatus::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Healthy => "healthy",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Unhealthy => "unhealthy",
            NodeStatus::Draining => "draining",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single database endpoint.
#[derive(Debug)]
pub struct ReplicaNode {
    pub id: NodeId,
    pub role: Role,
    pub url: Url,
    /// Opaque tag used by geographic routing.
    pub region: String,
    /// Relative share of traffic under weight-aware strategies (>= 1).
    pub weight: u32,
    pub metrics: NodeMetrics,
    status: AtomicU8,
    drained: Notify,
}

impl ReplicaNode {
    pub fn new(
        id: impl Into<NodeId>,
        role: Role,
        url: Url,
        region: impl Into<String>,
        weight: u32,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            url,
            region: region.into(),
            weight: weight.max(1),
            metrics: NodeMetrics::new(),
            status: AtomicU8::new(NodeStatus::Healthy as u8),
            drained: Notify::new(),
        }
    }

    pub fn primary(id: impl Into<NodeId>, url: Url, region: impl Into<String>) -> Self {
        Self::new(id, Role::Primary, url, region, 1)
    }

    pub fn replica(id: impl Into<NodeId>, url: Url, region: impl Into<String>, weight: u32) -> Self {
        Self::new(id, Role::Replica, url, region, weight)
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Atomically move from `from` to `to`. Fails if the status changed meanwhile.
    pub fn transition(&self, from: NodeStatus, to: NodeStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally set the status, returning the previous one.
    pub fn set_status(&self, status: NodeStatus) -> NodeStatus {
        NodeStatus::from(self.status.swap(status as u8, Ordering::AcqRel))
    }

    /// Stop accepting new traffic.
    ///
    /// Sequentially consistent with [`try_acquire`](Self::try_acquire): after
    /// this returns, either the caller sees the in-flight query in
    /// `active_connections` or the dispatcher sees `Draining`.
    pub fn mark_draining(&self) -> NodeStatus {
        NodeStatus::from(self.status.swap(NodeStatus::Draining as u8, Ordering::SeqCst))
    }

    /// Current lag estimate; the primary is by definition never behind.
    pub fn replication_lag_ms(&self) -> u64 {
        match self.role {
            Role::Primary => 0,
            Role::Replica => self.metrics.replication_lag_ms(),
        }
    }

    /// Register an in-flight query. The count drops when the guard is dropped,
    /// whatever the outcome of the query.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        let active = self.metrics.acquire_connection();
        crate::observability::metrics::record_active_connections(&self.id, active);
        ConnectionGuard { node: self.clone() }
    }

    /// Like [`acquire`](Self::acquire), but refuses a node that started
    /// draining after it was selected. The guard is released before returning
    /// `None`, so a drain waiter is never left hanging.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let guard = self.acquire();
        if NodeStatus::from(self.status.load(Ordering::SeqCst)) == NodeStatus::Draining {
            drop(guard);
            return None;
        }
        Some(guard)
    }

    /// Resolve once no query is in flight.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.metrics.active_connections() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let counters = self.metrics.counters();
        NodeSnapshot {
            id: self.id.clone(),
            role: self.role,
            region: self.region.clone(),
            weight: self.weight,
            status: self.status(),
            latency_ms: self.metrics.latency_ms(),
            error_rate: counters.errors.rate(),
            active_connections: self.metrics.active_connections(),
            estimated_replication_lag_ms: self.replication_lag_ms(),
            consecutive_failures: counters.consecutive_failures,
            consecutive_successes: counters.consecutive_successes,
            total_requests: self.metrics.total_requests(),
            total_failures: self.metrics.total_failures(),
        }
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    node: Arc<ReplicaNode>,
}

impl ConnectionGuard {
    pub fn node(&self) -> &Arc<ReplicaNode> {
        &self.node
    }
}

impl Deref for ConnectionGuard {
    type Target = ReplicaNode;
    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.node.metrics.release_connection();
        crate::observability::metrics::record_active_connections(&self.node.id, remaining);
        if remaining == 0 && self.node.status() == NodeStatus::Draining {
            self.node.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Arc<ReplicaNode> {
        let url = Url::parse(&format!("postgres://{id}:5432/app")).unwrap();
        Arc::new(ReplicaNode::replica(id, url, "us", 1))
    }

    #[test]
    fn test_guard_tracks_connections() {
        let n = node("r1");
        let g1 = n.acquire();
        let g2 = n.acquire();
        assert_eq!(n.metrics.active_connections(), 2);
        assert_eq!(g1.id, "r1");

        drop(g1);
        assert_eq!(n.metrics.active_connections(), 1);
        drop(g2);
        assert_eq!(n.metrics.active_connections(), 0);
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let n = node("r1");
        assert!(n.transition(NodeStatus::Healthy, NodeStatus::Degraded));
        assert!(!n.transition(NodeStatus::Healthy, NodeStatus::Unhealthy));
        assert_eq!(n.status(), NodeStatus::Degraded);

        n.mark_draining();
        assert!(!n.status().is_routable());
    }

    #[test]
    fn test_weight_is_at_least_one() {
        let url = Url::parse("postgres://r0:5432").unwrap();
        let n = ReplicaNode::replica("r0", url, "eu", 0);
        assert_eq!(n.weight, 1);
    }

    #[tokio::test]
    async fn test_wait_drained_resolves_when_last_guard_drops() {
        let n = node("r1");
        let guard = n.acquire();
        n.mark_draining();

        let waiter = {
            let n = n.clone();
            tokio::spawn(async move { n.wait_drained().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(n.metrics.active_connections(), 0);
    }

    #[test]
    fn test_try_acquire_refuses_draining_node() {
        let n = node("r1");
        let held = n.try_acquire().unwrap();
        assert_eq!(held.id, "r1");

        n.mark_draining();
        assert!(n.try_acquire().is_none());
        assert_eq!(n.metrics.active_connections(), 1);

        drop(held);
        assert_eq!(n.metrics.active_connections(), 0);
    }
}
