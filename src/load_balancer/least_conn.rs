//! Least Connections load balancing strategy.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::load_balancer::{LoadBalancer, Selection, StrategyUsed};
use crate::registry::{NodeStatus, ReplicaNode};
use crate::routing::intent::QueryIntent;

/// Selects the node with the fewest in-flight queries.
/// Ties go to the lower latency average, then to Healthy over Degraded.
/// Remaining ties keep eligible-set order.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }

    pub fn next(&self, nodes: &[Arc<ReplicaNode>]) -> Option<Arc<ReplicaNode>> {
        nodes.iter().min_by(|a, b| compare(a, b)).cloned()
    }
}

fn compare(a: &ReplicaNode, b: &ReplicaNode) -> Ordering {
    a.metrics
        .active_connections()
        .cmp(&b.metrics.active_connections())
        .then_with(|| a.metrics.latency_ms().total_cmp(&b.metrics.latency_ms()))
        .then_with(|| status_rank(a.status()).cmp(&status_rank(b.status())))
}

fn status_rank(status: NodeStatus) -> u8 {
    match status {
        NodeStatus::Healthy => 0,
        NodeStatus::Degraded => 1,
        NodeStatus::Unhealthy => 2,
        NodeStatus::Draining => 3,
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, eligible: &[Arc<ReplicaNode>], _intent: &QueryIntent) -> Option<Selection> {
        self.next(eligible).map(|node| Selection {
            node,
            strategy: StrategyUsed::LeastConnections,
        })
    }
}
