//! Database collaborators.
//!
//! The router never speaks a wire protocol itself. Query execution goes
//! through an [`Executor`] (a connection pool plus driver in practice) and
//! liveness checks go through a [`Prober`].

pub mod tcp;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::registry::ReplicaNode;

pub use tcp::TcpProber;

/// SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// Runs a statement against one node.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Whatever the driver hands back (rows, affected count, ...).
    type Output: Send;

    async fn execute(
        &self,
        node: &ReplicaNode,
        statement: &Statement,
    ) -> Result<Self::Output, DispatchError>;
}

/// Freshness signals gathered by a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Primary: newest committed transaction. Replica: newest replayed one.
    pub last_commit: Option<SystemTime>,
    /// Lag as reported directly by the engine, when it offers one.
    pub replication_lag: Option<Duration>,
}

/// Lightweight liveness check used by the background health monitor.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, node: &ReplicaNode) -> Result<ProbeReport, DispatchError>;
}
