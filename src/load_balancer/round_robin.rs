//! Round-robin load balancing strategy.
//!
//! Two rotations share one counter type:
//! - plain: `counter % len`, one slot per node, used by the `round-robin`
//!   strategy
//! - weighted: interleaved by effective weight, used inside the adaptive and
//!   geographic strategies. In round `r` every node whose effective weight
//!   exceeds `r` appears once, in eligible-set order. A node with weight 2
//!   next to one with weight 1 yields `A B A B A A` rather than `A A A A B B`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{LoadBalancer, Selection, StrategyUsed};
use crate::registry::{NodeStatus, ReplicaNode};
use crate::routing::intent::QueryIntent;

/// Healthy nodes get twice their configured share so Degraded ones see
/// reduced traffic without being starved.
pub fn effective_weight(node: &ReplicaNode) -> u64 {
    let weight = u64::from(node.weight.max(1));
    match node.status() {
        NodeStatus::Healthy => weight * 2,
        _ => weight,
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
    weighted: bool,
}

impl RoundRobin {
    /// Plain rotation: every eligible node gets the same share.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotation proportional to each node's effective weight.
    pub fn weighted() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            weighted: true,
        }
    }

    /// Next node in the rotation over `nodes`.
    pub fn next(&self, nodes: &[Arc<ReplicaNode>]) -> Option<Arc<ReplicaNode>> {
        if nodes.is_empty() {
            return None;
        }
        // The counter is never reset; only its modulus follows the current set.
        let tick = self.counter.fetch_add(1, Ordering::Relaxed) as u64;
        if !self.weighted {
            return nodes.get((tick % nodes.len() as u64) as usize).cloned();
        }

        let weights: Vec<u64> = nodes.iter().map(|n| effective_weight(n)).collect();
        let total: u64 = weights.iter().sum();
        weighted_slot(nodes, &weights, tick % total)
    }
}

/// Node at position `slot` of the interleaved rotation, computed band by band.
///
/// Between two consecutive distinct weights the set of nodes still in the
/// rotation is fixed, so each band is skipped in one step. Cost is bounded by
/// the number of distinct weights, not by their size.
fn weighted_slot(nodes: &[Arc<ReplicaNode>], weights: &[u64], mut slot: u64) -> Option<Arc<ReplicaNode>> {
    let mut floor = 0u64;
    loop {
        let ceiling = weights.iter().copied().filter(|w| *w > floor).min()?;
        let active = weights.iter().filter(|w| **w > floor).count() as u64;
        let band = active * (ceiling - floor);
        if slot < band {
            let index = (slot % active) as usize;
            return nodes
                .iter()
                .zip(weights)
                .filter(|(_, w)| **w > floor)
                .nth(index)
                .map(|(node, _)| node.clone());
        }
        slot -= band;
        floor = ceiling;
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self, eligible: &[Arc<ReplicaNode>], _intent: &QueryIntent) -> Option<Selection> {
        self.next(eligible).map(|node| Selection {
            node,
            strategy: StrategyUsed::RoundRobin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::{ids, replica};
    use std::collections::HashMap;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let nodes = vec![replica("r1", "us", 1), replica("r2", "us", 1)];

        let picks: Vec<_> = (0..4).map(|_| lb.next(&nodes).unwrap()).collect();
        assert_eq!(ids(&picks), vec!["r1", "r2", "r1", "r2"]);
    }

    #[test]
    fn test_plain_rotation_ignores_weight_and_health() {
        let lb = RoundRobin::new();
        let nodes = vec![replica("r1", "us", 2), replica("r2", "us", 1), replica("r3", "eu", 1)];
        nodes[2].set_status(NodeStatus::Degraded);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            *counts.entry(lb.next(&nodes).unwrap().id.clone()).or_default() += 1;
        }
        assert_eq!(counts["r1"], 10);
        assert_eq!(counts["r2"], 10);
        assert_eq!(counts["r3"], 10);
    }

    #[test]
    fn test_weighted_interleaving() {
        let lb = RoundRobin::weighted();
        let nodes = vec![replica("a", "us", 2), replica("b", "us", 1)];

        let picks: Vec<_> = (0..6).map(|_| lb.next(&nodes).unwrap()).collect();
        assert_eq!(ids(&picks), vec!["a", "b", "a", "b", "a", "a"]);
    }

    #[test]
    fn test_degraded_gets_half_share() {
        let lb = RoundRobin::weighted();
        let nodes = vec![replica("a", "us", 1), replica("b", "us", 1)];
        nodes[1].set_status(NodeStatus::Degraded);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            *counts.entry(lb.next(&nodes).unwrap().id.clone()).or_default() += 1;
        }
        assert_eq!(counts["a"], 20);
        assert_eq!(counts["b"], 10);
    }

    #[test]
    fn test_set_changes_do_not_need_reset() {
        let lb = RoundRobin::new();
        let three = vec![replica("r1", "us", 1), replica("r2", "us", 1), replica("r3", "us", 1)];
        lb.next(&three);

        let two = vec![three[0].clone(), three[2].clone()];
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            *counts.entry(lb.next(&two).unwrap().id.clone()).or_default() += 1;
        }
        assert_eq!(counts["r1"], 5);
        assert_eq!(counts["r3"], 5);
    }

    #[test]
    fn test_large_weights_resolve_without_walking() {
        let nodes = vec![replica("a", "us", 1_000_000), replica("b", "us", 1)];
        let lb = RoundRobin::weighted();
        let picks: Vec<_> = (0..6).map(|_| lb.next(&nodes).unwrap()).collect();
        assert_eq!(ids(&picks), vec!["a", "b", "a", "b", "a", "a"]);

        // Effective weights are 2_000_000 and 2; the last slot of the cycle is `a`.
        let near_end = RoundRobin {
            counter: AtomicUsize::new(2_000_001),
            weighted: true,
        };
        assert_eq!(near_end.next(&nodes).unwrap().id, "a");
        assert_eq!(near_end.next(&nodes).unwrap().id, "a");
        assert_eq!(near_end.next(&nodes).unwrap().id, "b");
    }

    #[test]
    fn test_weighted_slot_bands() {
        let nodes = vec![replica("a", "us", 3), replica("b", "us", 1), replica("c", "us", 2)];
        let weights = [3, 1, 2];
        let order: Vec<_> = (0..6)
            .map(|slot| weighted_slot(&nodes, &weights, slot).unwrap().id.clone())
            .collect();
        assert_eq!(order, vec!["a", "b", "c", "a", "c", "a"]);
        assert!(weighted_slot(&nodes, &weights, 6).is_none());
    }
}
