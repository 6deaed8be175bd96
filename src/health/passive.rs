//! Passive health checking (dispatch feedback).
//!
//! # Design Decisions
//! - Connection errors and timeouts are failures
//! - A rejected statement is a success: the node answered
//! - Cancellation is caller-initiated and never touches node health

use std::time::Duration;

use crate::health::state::{HealthTracker, Observation, Transition};
use crate::registry::ReplicaNode;

/// How a dispatch ended, from the node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed { latency: Duration },
    QueryRejected { latency: Duration },
    ConnectionFailed,
    TimedOut,
    Cancelled,
}

impl DispatchOutcome {
    pub fn observation(&self) -> Option<Observation> {
        match *self {
            DispatchOutcome::Completed { latency } | DispatchOutcome::QueryRejected { latency } => {
                Some(Observation::Success {
                    latency: Some(latency),
                })
            }
            DispatchOutcome::ConnectionFailed | DispatchOutcome::TimedOut => {
                Some(Observation::Failure)
            }
            DispatchOutcome::Cancelled => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed { .. } => "completed",
            DispatchOutcome::QueryRejected { .. } => "query_rejected",
            DispatchOutcome::ConnectionFailed => "connection_failed",
            DispatchOutcome::TimedOut => "timed_out",
            DispatchOutcome::Cancelled => "cancelled",
        }
    }
}

/// Feed a dispatch outcome into the node's health state.
pub fn report(tracker: &HealthTracker, node: &ReplicaNode, outcome: DispatchOutcome) -> Vec<Transition> {
    match outcome.observation() {
        Some(observation) => tracker.observe(node, observation),
        None => {
            tracing::debug!(node = %node.id, "Dispatch cancelled by caller; health unchanged");
            Vec::new()
        }
    }
}
