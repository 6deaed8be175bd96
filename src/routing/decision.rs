//! Routing decisions and the failover trail behind them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::load_balancer::StrategyUsed;
use crate::registry::ReplicaNode;

/// Why the target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Write,
    ForcePrimary,
    StrongConsistency,
    ZeroStaleness,
    SessionStickiness,
    /// The balancer's pick among the eligible replicas.
    ReplicaRead,
    PreferredRegionFallback,
    HealthyReplicaFallback,
    PrimaryFallback,
    UnhealthyLastResort,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Write => "write",
            DecisionReason::ForcePrimary => "force_primary",
            DecisionReason::StrongConsistency => "strong_consistency",
            DecisionReason::ZeroStaleness => "zero_staleness",
            DecisionReason::SessionStickiness => "session_stickiness",
            DecisionReason::ReplicaRead => "replica_read",
            DecisionReason::PreferredRegionFallback => "preferred_region_fallback",
            DecisionReason::HealthyReplicaFallback => "healthy_replica_fallback",
            DecisionReason::PrimaryFallback => "primary_fallback",
            DecisionReason::UnhealthyLastResort => "unhealthy_last_resort",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages of the failover chain, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStage {
    Balancer,
    PreferredRegion,
    AnyHealthyReplica,
    Primary,
    UnhealthyLastResort,
}

impl FailoverStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverStage::Balancer => "balancer",
            FailoverStage::PreferredRegion => "preferred_region",
            FailoverStage::AnyHealthyReplica => "any_healthy_replica",
            FailoverStage::Primary => "primary",
            FailoverStage::UnhealthyLastResort => "unhealthy_last_resort",
        }
    }
}

/// A stage that was tried (or skipped) without producing a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackStep {
    pub stage: FailoverStage,
    pub reason: String,
}

impl FallbackStep {
    pub fn new(stage: FailoverStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FallbackStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage.as_str(), self.reason)
    }
}

/// Where a query goes and how that was decided.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub target: Arc<ReplicaNode>,
    pub strategy_used: StrategyUsed,
    pub reason: DecisionReason,
    /// Stages passed over before `target` was found; empty when the first
    /// choice stood.
    pub fallback_steps: Vec<FallbackStep>,
}

impl RoutingDecision {
    pub fn direct(target: Arc<ReplicaNode>, reason: DecisionReason) -> Self {
        Self {
            target,
            strategy_used: StrategyUsed::Direct,
            reason,
            fallback_steps: Vec::new(),
        }
    }
}
