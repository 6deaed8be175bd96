//! Failover chain.
//!
//! ```text
//! (a) balancer over the consistency-filtered eligible set
//! (b) preferred region only          (skipped without a hint)
//! (c) any Healthy replica
//! (d) primary                        (if fallback_to_primary)
//! (d') Unhealthy replica             (if unhealthy_last_resort)
//! (e) NoEligibleNode with every step above
//! ```
//!
//! Stages (b) onwards re-read the registry and re-apply the staleness bound.
//! Nodes that already failed during this call are skipped everywhere.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RoutingConfig;
use crate::consistency::within_bound;
use crate::error::RouterError;
use crate::load_balancer::{Balancer, LeastConnections, LoadBalancer, Selection, StrategyUsed};
use crate::observability::metrics;
use crate::registry::{NodeId, NodeStatus, Registry, ReplicaNode};
use crate::routing::decision::{DecisionReason, FailoverStage, FallbackStep, RoutingDecision};
use crate::routing::intent::QueryIntent;

pub struct FailoverManager<'a> {
    registry: &'a Registry,
    balancer: &'a Balancer,
    routing: &'a RoutingConfig,
    excluded: &'a HashSet<NodeId>,
}

impl<'a> FailoverManager<'a> {
    pub fn new(
        registry: &'a Registry,
        balancer: &'a Balancer,
        routing: &'a RoutingConfig,
        excluded: &'a HashSet<NodeId>,
    ) -> Self {
        Self {
            registry,
            balancer,
            routing,
            excluded,
        }
    }

    pub fn resolve(
        &self,
        intent: &QueryIntent,
        eligible: &[Arc<ReplicaNode>],
        max_staleness_ms: Option<u64>,
    ) -> Result<RoutingDecision, RouterError> {
        let mut steps = Vec::new();

        // (a)
        let candidates = self.usable(eligible.iter().cloned());
        match self.balancer.select(&candidates, intent) {
            Some(selection) if selection.node.status().is_routable() => {
                metrics::record_fallback_step(FailoverStage::Balancer.as_str(), "selected");
                return Ok(decision(selection, DecisionReason::ReplicaRead, steps));
            }
            Some(selection) => self.record(
                &mut steps,
                FailoverStage::Balancer,
                format!("selected {} but it is now {}", selection.node.id, selection.node.status()),
            ),
            None => self.record(
                &mut steps,
                FailoverStage::Balancer,
                format!("no eligible replica among {} candidates", eligible.len()),
            ),
        }

        // (b)
        match intent.preferred_region.as_deref() {
            Some(region) => {
                let in_region = self.fresh_replicas(max_staleness_ms, |n| {
                    n.region == region && n.status().is_routable()
                });
                match self.pick(&in_region, intent) {
                    Some(selection) => {
                        return Ok(self.settle(
                            selection,
                            FailoverStage::PreferredRegion,
                            DecisionReason::PreferredRegionFallback,
                            steps,
                        ))
                    }
                    None => self.record(
                        &mut steps,
                        FailoverStage::PreferredRegion,
                        format!("no routable replica in region {region}"),
                    ),
                }
            }
            None => self.record(&mut steps, FailoverStage::PreferredRegion, "skipped: no preferred region"),
        }

        // (c)
        let healthy = self.fresh_replicas(max_staleness_ms, |n| n.status() == NodeStatus::Healthy);
        match self.pick(&healthy, intent) {
            Some(selection) => {
                return Ok(self.settle(
                    selection,
                    FailoverStage::AnyHealthyReplica,
                    DecisionReason::HealthyReplicaFallback,
                    steps,
                ))
            }
            None => self.record(
                &mut steps,
                FailoverStage::AnyHealthyReplica,
                "no healthy replica within the staleness bound",
            ),
        }

        // (d)
        let primary = self.registry.get_primary();
        if !self.routing.fallback_to_primary {
            self.record(&mut steps, FailoverStage::Primary, "disabled: fallback_to_primary is off");
        } else if intent.replica_only {
            self.record(&mut steps, FailoverStage::Primary, "disabled: read is replica-only");
        } else if self.excluded.contains(&primary.id) {
            self.record(&mut steps, FailoverStage::Primary, "primary already failed this call");
        } else {
            metrics::record_fallback_step(FailoverStage::Primary.as_str(), "selected");
            tracing::info!(node = %primary.id, steps = steps.len(), "Falling back to primary");
            return Ok(RoutingDecision {
                target: primary,
                strategy_used: StrategyUsed::Direct,
                reason: DecisionReason::PrimaryFallback,
                fallback_steps: steps,
            });
        }

        // (d')
        if self.routing.unhealthy_last_resort {
            let unhealthy = self.fresh_replicas(max_staleness_ms, |n| n.status() == NodeStatus::Unhealthy);
            match LeastConnections::new().next(&unhealthy) {
                Some(node) => {
                    metrics::record_fallback_step(FailoverStage::UnhealthyLastResort.as_str(), "selected");
                    tracing::warn!(node = %node.id, "Routing to unhealthy replica as last resort");
                    return Ok(RoutingDecision {
                        target: node,
                        strategy_used: StrategyUsed::Direct,
                        reason: DecisionReason::UnhealthyLastResort,
                        fallback_steps: steps,
                    });
                }
                None => self.record(
                    &mut steps,
                    FailoverStage::UnhealthyLastResort,
                    "no unhealthy replica within the staleness bound",
                ),
            }
        }

        // (e)
        tracing::warn!(steps = steps.len(), "Failover chain exhausted");
        Err(RouterError::NoEligibleNode { steps })
    }

    fn pick(&self, nodes: &[Arc<ReplicaNode>], intent: &QueryIntent) -> Option<Selection> {
        self.balancer.select(nodes, intent)
    }

    fn settle(
        &self,
        selection: Selection,
        stage: FailoverStage,
        reason: DecisionReason,
        steps: Vec<FallbackStep>,
    ) -> RoutingDecision {
        metrics::record_fallback_step(stage.as_str(), "selected");
        tracing::info!(
            node = %selection.node.id,
            stage = stage.as_str(),
            strategy = %selection.strategy,
            "Failover selected replica"
        );
        decision(selection, reason, steps)
    }

    fn record(&self, steps: &mut Vec<FallbackStep>, stage: FailoverStage, reason: impl Into<String>) {
        let step = FallbackStep::new(stage, reason);
        let outcome = if step.reason.starts_with("skipped") || step.reason.starts_with("disabled") {
            "skipped"
        } else {
            "empty"
        };
        metrics::record_fallback_step(stage.as_str(), outcome);
        tracing::debug!(stage = stage.as_str(), reason = %step.reason, "Failover step produced no node");
        steps.push(step);
    }

    fn usable(&self, nodes: impl Iterator<Item = Arc<ReplicaNode>>) -> Vec<Arc<ReplicaNode>> {
        nodes
            .filter(|n| !self.excluded.contains(&n.id) && n.status().is_routable())
            .collect()
    }

    fn fresh_replicas(
        &self,
        max_staleness_ms: Option<u64>,
        keep: impl Fn(&ReplicaNode) -> bool,
    ) -> Vec<Arc<ReplicaNode>> {
        self.registry
            .replicas()
            .into_iter()
            .filter(|n| !self.excluded.contains(&n.id))
            .filter(|n| within_bound(n, max_staleness_ms))
            .filter(|n| keep(n))
            .collect()
    }
}

fn decision(selection: Selection, reason: DecisionReason, steps: Vec<FallbackStep>) -> RoutingDecision {
    RoutingDecision {
        target: selection.node,
        strategy_used: selection.strategy,
        reason,
        fallback_steps: steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdaptiveConfig, StrategyKind};
    use url::Url;

    fn registry() -> Registry {
        let url = |h: &str| Url::parse(&format!("postgres://{h}:5432")).unwrap();
        Registry::new(
            ReplicaNode::primary("p", url("p"), "us"),
            vec![
                ReplicaNode::replica("r1", url("r1"), "us", 1),
                ReplicaNode::replica("r2", url("r2"), "eu", 1),
            ],
        )
        .unwrap()
    }

    fn round_robin() -> Balancer {
        Balancer::from_config(StrategyKind::RoundRobin, &AdaptiveConfig::default())
    }

    fn stages(steps: &[FallbackStep]) -> Vec<FailoverStage> {
        steps.iter().map(|s| s.stage).collect()
    }

    #[test]
    fn test_first_choice_has_no_steps() {
        let reg = registry();
        let lb = round_robin();
        let routing = RoutingConfig::default();
        let excluded = HashSet::new();
        let fm = FailoverManager::new(&reg, &lb, &routing, &excluded);

        let d = fm.resolve(&QueryIntent::read(), &reg.replicas(), None).unwrap();
        assert_eq!(d.reason, DecisionReason::ReplicaRead);
        assert!(d.fallback_steps.is_empty());
    }

    #[test]
    fn test_stale_pick_falls_through_to_region() {
        let reg = registry();
        let lb = round_robin();
        let routing = RoutingConfig::default();
        let excluded = HashSet::new();
        let fm = FailoverManager::new(&reg, &lb, &routing, &excluded);

        // The eligible set was computed before r1 went down.
        let eligible = vec![reg.get("r1").unwrap()];
        reg.get("r1").unwrap().set_status(NodeStatus::Unhealthy);

        let intent = QueryIntent::read().with_preferred_region("eu");
        let d = fm.resolve(&intent, &eligible, None).unwrap();
        assert_eq!(d.target.id, "r2");
        assert_eq!(d.reason, DecisionReason::PreferredRegionFallback);
        assert_eq!(stages(&d.fallback_steps), vec![FailoverStage::Balancer]);
    }

    #[test]
    fn test_full_chain_to_primary_and_exhaustion() {
        let reg = registry();
        for r in reg.replicas() {
            r.set_status(NodeStatus::Unhealthy);
        }
        let lb = round_robin();
        let excluded = HashSet::new();

        let routing = RoutingConfig::default();
        let fm = FailoverManager::new(&reg, &lb, &routing, &excluded);
        let d = fm.resolve(&QueryIntent::read(), &[], None).unwrap();
        assert_eq!(d.target.id, "p");
        assert_eq!(d.reason, DecisionReason::PrimaryFallback);
        assert_eq!(
            stages(&d.fallback_steps),
            vec![
                FailoverStage::Balancer,
                FailoverStage::PreferredRegion,
                FailoverStage::AnyHealthyReplica
            ]
        );

        let no_primary = RoutingConfig {
            fallback_to_primary: false,
            ..RoutingConfig::default()
        };
        let fm = FailoverManager::new(&reg, &lb, &no_primary, &excluded);
        match fm.resolve(&QueryIntent::read(), &[], None) {
            Err(RouterError::NoEligibleNode { steps }) => assert_eq!(steps.len(), 4),
            other => panic!("expected NoEligibleNode, got {other:?}"),
        }
    }

    #[test]
    fn test_unhealthy_last_resort_respects_exclusions() {
        let reg = registry();
        for r in reg.replicas() {
            r.set_status(NodeStatus::Unhealthy);
        }
        let lb = round_robin();
        let routing = RoutingConfig {
            fallback_to_primary: false,
            unhealthy_last_resort: true,
            ..RoutingConfig::default()
        };
        let excluded: HashSet<NodeId> = ["r1".to_string()].into_iter().collect();
        let fm = FailoverManager::new(&reg, &lb, &routing, &excluded);

        let d = fm.resolve(&QueryIntent::read(), &[], None).unwrap();
        assert_eq!(d.target.id, "r2");
        assert_eq!(d.reason, DecisionReason::UnhealthyLastResort);
        assert_eq!(d.fallback_steps.len(), 4);
    }
}
