//! Geographic load balancing strategy.

use std::sync::Arc;

use crate::config::AdaptiveConfig;
use crate::load_balancer::{Adaptive, LoadBalancer, RoundRobin, Selection, StrategyUsed};
use crate::registry::ReplicaNode;
use crate::routing::intent::QueryIntent;

/// Prefers nodes in the caller's region; otherwise defers to [`Adaptive`]
/// over the whole eligible set.
#[derive(Debug)]
pub struct Geographic {
    local: RoundRobin,
    fallback: Adaptive,
}

impl Geographic {
    pub fn new(adaptive: AdaptiveConfig) -> Self {
        Self {
            local: RoundRobin::weighted(),
            fallback: Adaptive::new(adaptive),
        }
    }
}

impl LoadBalancer for Geographic {
    fn select(&self, eligible: &[Arc<ReplicaNode>], intent: &QueryIntent) -> Option<Selection> {
        if let Some(region) = intent.preferred_region.as_deref() {
            let local: Vec<Arc<ReplicaNode>> = eligible
                .iter()
                .filter(|n| n.region == region)
                .cloned()
                .collect();
            if let Some(node) = self.local.next(&local) {
                return Some(Selection {
                    node,
                    strategy: StrategyUsed::Geographic,
                });
            }
            tracing::debug!(region, "No eligible node in preferred region; falling back to adaptive");
        }

        self.fallback.pick(eligible).map(|(node, pick)| Selection {
            node,
            strategy: StrategyUsed::GeographicFallback(pick),
        })
    }
}
