//! Adaptive load balancing strategy.
//!
//! Decided from scratch on every call: while the eligible set looks healthy
//! it spreads load by weighted round-robin; once the aggregate error rate or
//! p95 latency crosses its threshold it switches to least-connections so no
//! single struggling node gets piled onto. No memory of the previous choice.

use std::sync::Arc;

use crate::config::AdaptiveConfig;
use crate::load_balancer::{LeastConnections, LoadBalancer, Pick, RoundRobin, Selection, StrategyUsed};
use crate::registry::ReplicaNode;
use crate::routing::intent::QueryIntent;

/// Health of an eligible set taken as a whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateHealth {
    /// Failures over outcomes across every node's error window.
    pub error_rate: f64,
    /// Nearest-rank 95th percentile of the per-node latency averages.
    /// `None` until some node has a latency sample.
    pub p95_latency_ms: Option<f64>,
}

impl AggregateHealth {
    pub fn of(nodes: &[Arc<ReplicaNode>]) -> Self {
        let (failures, samples) = nodes.iter().fold((0usize, 0usize), |(f, s), node| {
            let sample = node.metrics.error_sample();
            (f + sample.failures, s + sample.samples)
        });
        let error_rate = if samples == 0 {
            0.0
        } else {
            failures as f64 / samples as f64
        };

        let mut latencies: Vec<f64> = nodes
            .iter()
            .filter(|n| n.metrics.has_latency())
            .map(|n| n.metrics.latency_ms())
            .collect();
        latencies.sort_by(f64::total_cmp);
        let p95_latency_ms = if latencies.is_empty() {
            None
        } else {
            let rank = (0.95 * latencies.len() as f64).ceil() as usize;
            latencies.get(rank.saturating_sub(1)).copied()
        };

        Self {
            error_rate,
            p95_latency_ms,
        }
    }
}

#[derive(Debug)]
pub struct Adaptive {
    thresholds: AdaptiveConfig,
    round_robin: RoundRobin,
    least_connections: LeastConnections,
}

impl Adaptive {
    pub fn new(thresholds: AdaptiveConfig) -> Self {
        Self {
            thresholds,
            round_robin: RoundRobin::weighted(),
            least_connections: LeastConnections::new(),
        }
    }

    /// Which algorithm the current aggregate metrics call for.
    pub fn choose(&self, nodes: &[Arc<ReplicaNode>]) -> Pick {
        let health = AggregateHealth::of(nodes);
        let slow = health
            .p95_latency_ms
            .is_some_and(|p95| p95 > self.thresholds.p95_latency_ms);
        if health.error_rate > self.thresholds.error_rate_threshold || slow {
            tracing::debug!(
                error_rate = health.error_rate,
                p95_latency_ms = ?health.p95_latency_ms,
                "Aggregate health poor; using least-connections"
            );
            Pick::LeastConnections
        } else {
            Pick::RoundRobin
        }
    }

    /// Select and report which algorithm was used.
    pub fn pick(&self, nodes: &[Arc<ReplicaNode>]) -> Option<(Arc<ReplicaNode>, Pick)> {
        if nodes.is_empty() {
            return None;
        }
        let pick = self.choose(nodes);
        let node = match pick {
            Pick::RoundRobin => self.round_robin.next(nodes),
            Pick::LeastConnections => self.least_connections.next(nodes),
        }?;
        Some((node, pick))
    }
}

impl LoadBalancer for Adaptive {
    fn select(&self, eligible: &[Arc<ReplicaNode>], _intent: &QueryIntent) -> Option<Selection> {
        self.pick(eligible).map(|(node, pick)| Selection {
            node,
            strategy: StrategyUsed::Adaptive(pick),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::replica;

    #[test]
    fn test_aggregate_health() {
        let a = replica("a", "us", 1);
        let b = replica("b", "us", 1);
        for _ in 0..9 {
            a.metrics.record_outcome(true, 100);
        }
        a.metrics.record_outcome(false, 100);
        for _ in 0..10 {
            b.metrics.record_outcome(true, 100);
        }
        a.metrics.record_latency(10.0, 0.2);
        b.metrics.record_latency(300.0, 0.2);

        let health = AggregateHealth::of(&[a, b]);
        assert_eq!(health.error_rate, 0.05);
        assert_eq!(health.p95_latency_ms, Some(300.0));
    }

    #[test]
    fn test_switches_on_error_rate_and_heals() {
        let lb = Adaptive::new(AdaptiveConfig::default());
        let a = replica("a", "us", 1);
        let b = replica("b", "us", 1);
        let nodes = vec![a.clone(), b.clone()];
        assert_eq!(lb.choose(&nodes), Pick::RoundRobin);

        for _ in 0..5 {
            a.metrics.record_outcome(false, 100);
            b.metrics.record_outcome(true, 100);
        }
        assert_eq!(lb.choose(&nodes), Pick::LeastConnections);

        // Busy node is avoided while in least-connections mode.
        let _guard = b.acquire();
        let selection = lb.select(&nodes, &QueryIntent::read()).unwrap();
        assert_eq!(selection.node.id, "a");
        assert_eq!(selection.strategy, StrategyUsed::Adaptive(Pick::LeastConnections));

        for _ in 0..200 {
            a.metrics.record_outcome(true, 100);
            b.metrics.record_outcome(true, 100);
        }
        assert_eq!(lb.choose(&nodes), Pick::RoundRobin);
    }

    #[test]
    fn test_switches_on_p95_latency() {
        let lb = Adaptive::new(AdaptiveConfig::default());
        let a = replica("a", "us", 1);
        a.metrics.record_latency(400.0, 0.2);
        assert_eq!(lb.choose(&[a]), Pick::LeastConnections);
    }
}
