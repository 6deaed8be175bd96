//! Error taxonomy for routing and dispatch.
//!
//! Node-health transitions never show up here; they only influence future
//! routing and are visible through `status()`.

use std::time::Duration;
use thiserror::Error;

use crate::registry::NodeId;
use crate::routing::decision::FallbackStep;

/// Errors surfaced to callers of `select`/`mutate`.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Transient network-level failure talking to a node.
    #[error("connection to node {node} failed: {message}")]
    Connection { node: NodeId, message: String },

    /// The caller's deadline elapsed while the node was executing.
    #[error("query on node {node} exceeded {timeout:?}")]
    Timeout { node: NodeId, timeout: Duration },

    /// Every failover step was tried and none produced a usable node.
    #[error("no eligible node after {} failover steps", steps.len())]
    NoEligibleNode { steps: Vec<FallbackStep> },

    /// The requested guarantees contradict each other; retrying cannot help.
    #[error("consistency requirement cannot be satisfied: {reason}")]
    ConsistencyUnsatisfiable { reason: String },

    /// The caller cancelled the query.
    #[error("query cancelled by caller")]
    Cancelled,

    /// The database rejected the statement itself.
    #[error("node {node} rejected query: {message}")]
    Query { node: NodeId, message: String },
}

impl RouterError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::Connection { .. } => "connection",
            RouterError::Timeout { .. } => "timeout",
            RouterError::NoEligibleNode { .. } => "no_eligible_node",
            RouterError::ConsistencyUnsatisfiable { .. } => "consistency_unsatisfiable",
            RouterError::Cancelled => "cancelled",
            RouterError::Query { .. } => "query",
        }
    }
}

/// Failure reported by an [`Executor`](crate::client::Executor) or
/// [`Prober`](crate::client::Prober).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Socket-level failure; counts against node health.
    #[error("connection error: {0}")]
    Connection(String),

    /// The node answered but refused the statement; node health is unaffected.
    #[error("query error: {0}")]
    Query(String),
}

/// Errors raised while mutating the replica inventory.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node {0} is already registered")]
    DuplicateNode(NodeId),

    #[error("a primary is already registered; refusing {0}")]
    PrimaryAlreadyRegistered(NodeId),

    #[error("node {0} must have the primary role")]
    NotAPrimary(NodeId),

    #[error("the primary node {0} cannot be removed")]
    CannotRemovePrimary(NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("invalid node {id}: {reason}")]
    InvalidNode { id: String, reason: String },
}
