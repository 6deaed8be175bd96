//! Consistency controller.
//!
//! # Data Flow
//! ```text
//! QueryIntent
//!     → write / force_primary / Strong / zero staleness → Primary
//!     → session wrote within the stickiness window      → Primary
//!         (unless Eventual with a bound wider than the time since that write)
//!     → otherwise: routable replicas within the staleness bound
//! ```
//!
//! Never touches the network. It only narrows the candidate set or decides
//! "primary, no balancing needed".

pub mod session;

use std::sync::Arc;
use std::time::Duration;

use crate::error::RouterError;
use crate::registry::{Registry, ReplicaNode};
use crate::routing::decision::DecisionReason;
use crate::routing::intent::{Consistency, QueryIntent};

pub use session::{ConsistencySession, SessionId, SessionTracker};

/// What a query is allowed to target.
#[derive(Debug, Clone)]
pub enum ConsistencyPlan {
    /// Only the primary may serve it.
    Primary(DecisionReason),
    /// Replicas are allowed; `eligible` is already filtered by health and lag.
    Replicas {
        eligible: Vec<Arc<ReplicaNode>>,
        max_staleness_ms: Option<u64>,
    },
}

#[derive(Debug, Clone)]
pub struct ConsistencyController {
    sessions: Arc<SessionTracker>,
}

impl ConsistencyController {
    pub fn new(sessions: Arc<SessionTracker>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    /// Classify `intent`. Fails only for replica-only reads that the
    /// requested guarantees pin to the primary.
    pub fn plan(
        &self,
        registry: &Registry,
        intent: &QueryIntent,
        stickiness_window: Duration,
    ) -> Result<ConsistencyPlan, RouterError> {
        let plan = self.classify(registry, intent, stickiness_window);
        match plan {
            ConsistencyPlan::Primary(reason) if intent.replica_only => {
                Err(RouterError::ConsistencyUnsatisfiable {
                    reason: format!("replica-only read requires the primary ({reason})"),
                })
            }
            plan => Ok(plan),
        }
    }

    fn classify(
        &self,
        registry: &Registry,
        intent: &QueryIntent,
        stickiness_window: Duration,
    ) -> ConsistencyPlan {
        if intent.is_write {
            return ConsistencyPlan::Primary(DecisionReason::Write);
        }
        if intent.force_primary {
            return ConsistencyPlan::Primary(DecisionReason::ForcePrimary);
        }
        if intent.consistency == Consistency::Strong {
            return ConsistencyPlan::Primary(DecisionReason::StrongConsistency);
        }
        let bound = match intent.consistency {
            Consistency::Eventual => intent.max_staleness_ms,
            _ => None,
        };
        if bound == Some(0) {
            return ConsistencyPlan::Primary(DecisionReason::ZeroStaleness);
        }

        let since_write = intent
            .session
            .and_then(|session| self.sessions.elapsed_since_write(&session))
            .filter(|elapsed| *elapsed < stickiness_window);
        if let Some(elapsed) = since_write {
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            // Only an explicit bound wider than the time since the write lets
            // a replica serve this session.
            if !bound.is_some_and(|max| max > elapsed_ms) {
                return ConsistencyPlan::Primary(DecisionReason::SessionStickiness);
            }
        }

        let eligible = registry
            .replicas()
            .into_iter()
            .filter(|node| node.status().is_routable())
            .filter(|node| within_bound(node, bound))
            .collect();
        ConsistencyPlan::Replicas {
            eligible,
            max_staleness_ms: bound,
        }
    }
}

/// Whether `node`'s estimated lag satisfies `max_staleness_ms`.
pub fn within_bound(node: &ReplicaNode, max_staleness_ms: Option<u64>) -> bool {
    max_staleness_ms.map_or(true, |max| node.replication_lag_ms() <= max)
}
