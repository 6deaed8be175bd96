//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Consistency plan → eligible replicas
//!     → Balancer (strategy fixed by config, swapped on reload):
//!         - round_robin.rs (plain rotation; weighted inside adaptive/geographic)
//!         - least_conn.rs (fewest in-flight queries)
//!         - geographic.rs (preferred region, else adaptive)
//!         - adaptive.rs (round-robin while healthy, else least-connections)
//!     → Selection (node + strategy actually used)
//!     → Failover manager validates the pick
//! ```
//!
//! # Design Decisions
//! - Strategies never block and never fail; an empty set yields `None`
//! - Strategies hold no per-node state; nodes carry their own metrics
//! - The only shared mutable state is the round-robin counter

pub mod adaptive;
pub mod geographic;
pub mod least_conn;
pub mod round_robin;

use std::fmt;
use std::sync::Arc;

use crate::config::{AdaptiveConfig, StrategyKind};
use crate::registry::ReplicaNode;
use crate::routing::intent::QueryIntent;

pub use adaptive::{Adaptive, AggregateHealth};
pub use geographic::Geographic;
pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;

/// Picks one node out of an eligible set.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// `None` means "no selection"; whether that is fatal is up to the caller.
    fn select(&self, eligible: &[Arc<ReplicaNode>], intent: &QueryIntent) -> Option<Selection>;
}

/// The underlying algorithm the adaptive strategy settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    RoundRobin,
    LeastConnections,
}

impl Pick {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pick::RoundRobin => "round-robin",
            Pick::LeastConnections => "least-connections",
        }
    }
}

/// Strategy that produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyUsed {
    RoundRobin,
    LeastConnections,
    Geographic,
    Adaptive(Pick),
    /// Geographic hint could not be honoured; adaptive chose instead.
    GeographicFallback(Pick),
    /// No balancing involved (primary or last-resort target).
    Direct,
}

impl StrategyUsed {
    pub fn label(&self) -> &'static str {
        match self {
            StrategyUsed::RoundRobin => "round-robin",
            StrategyUsed::LeastConnections => "least-connections",
            StrategyUsed::Geographic => "geographic",
            StrategyUsed::Adaptive(Pick::RoundRobin) => "adaptive:round-robin",
            StrategyUsed::Adaptive(Pick::LeastConnections) => "adaptive:least-connections",
            StrategyUsed::GeographicFallback(Pick::RoundRobin) => "geographic->adaptive:round-robin",
            StrategyUsed::GeographicFallback(Pick::LeastConnections) => {
                "geographic->adaptive:least-connections"
            }
            StrategyUsed::Direct => "direct",
        }
    }
}

impl fmt::Display for StrategyUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub node: Arc<ReplicaNode>,
    pub strategy: StrategyUsed,
}

/// The configured strategy. Closed set, chosen once per configuration.
#[derive(Debug)]
pub enum Balancer {
    RoundRobin(RoundRobin),
    LeastConnections(LeastConnections),
    Geographic(Geographic),
    Adaptive(Adaptive),
}

impl Balancer {
    pub fn from_config(kind: StrategyKind, adaptive: &AdaptiveConfig) -> Self {
        match kind {
            StrategyKind::RoundRobin => Balancer::RoundRobin(RoundRobin::new()),
            StrategyKind::LeastConnections => Balancer::LeastConnections(LeastConnections::new()),
            StrategyKind::Geographic => Balancer::Geographic(Geographic::new(adaptive.clone())),
            StrategyKind::Adaptive => Balancer::Adaptive(Adaptive::new(adaptive.clone())),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Balancer::RoundRobin(_) => StrategyKind::RoundRobin,
            Balancer::LeastConnections(_) => StrategyKind::LeastConnections,
            Balancer::Geographic(_) => StrategyKind::Geographic,
            Balancer::Adaptive(_) => StrategyKind::Adaptive,
        }
    }
}

impl LoadBalancer for Balancer {
    fn select(&self, eligible: &[Arc<ReplicaNode>], intent: &QueryIntent) -> Option<Selection> {
        match self {
            Balancer::RoundRobin(lb) => lb.select(eligible, intent),
            Balancer::LeastConnections(lb) => lb.select(eligible, intent),
            Balancer::Geographic(lb) => lb.select(eligible, intent),
            Balancer::Adaptive(lb) => lb.select(eligible, intent),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use url::Url;

    pub fn replica(id: &str, region: &str, weight: u32) -> Arc<ReplicaNode> {
        let url = Url::parse(&format!("postgres://{id}:5432/app")).unwrap();
        Arc::new(ReplicaNode::replica(id, url, region, weight))
    }

    pub fn ids(picks: &[Arc<ReplicaNode>]) -> Vec<&str> {
        picks.iter().map(|n| n.id.as_str()).collect()
    }
}
