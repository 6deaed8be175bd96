//! Replica registry.
//!
//! # Data Flow
//! ```text
//! RouterConfig
//!     → nodes_from_config (primary + replicas)
//!     → Registry (single owner of node identity)
//!     → consistency / load_balancer / failover read Arc<ReplicaNode> handles
//!     → health monitor and dispatch update the shared metrics in place
//! ```
//!
//! # Design Decisions
//! - Concurrent map keyed by node id; no global lock on the routing path
//! - Registry order (insertion sequence) gives strategies a stable rotation
//! - Removal drains: the node stops taking traffic and leaves the map once idle

pub mod metrics;
pub mod node;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use url::Url;

use crate::client::tcp::database_port;
use crate::config::RouterConfig;
use crate::error::RegistryError;

pub use metrics::{NodeMetrics, NodeSnapshot};
pub use node::{ConnectionGuard, NodeId, NodeStatus, ReplicaNode, Role};

/// Outcome of [`Registry::remove_node`].
#[derive(Debug)]
pub enum Removal {
    /// The node was idle and is gone.
    Removed,
    /// The node is draining; the handle completes once it has been removed.
    Draining(JoinHandle<()>),
}

/// Changes applied by [`Registry::reconcile`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<NodeId>,
    pub draining: Vec<NodeId>,
}

/// Read-only view consumed by monitoring and alerting.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    /// Replicas in service. Draining replicas are counted separately.
    pub total_replicas: usize,
    pub healthy_replicas: usize,
    pub draining_replicas: usize,
    pub health_score_percent: f64,
    pub nodes: Vec<NodeSnapshot>,
}

/// Inventory of the primary and its replicas.
#[derive(Debug)]
pub struct Registry {
    nodes: DashMap<NodeId, (u64, Arc<ReplicaNode>)>,
    primary: Arc<ReplicaNode>,
    next_seq: AtomicU64,
}

impl Registry {
    /// Build a registry. `primary` must carry the primary role and no replica may.
    pub fn new(primary: ReplicaNode, replicas: Vec<ReplicaNode>) -> Result<Self, RegistryError> {
        if !primary.is_primary() {
            return Err(RegistryError::NotAPrimary(primary.id));
        }
        let primary = Arc::new(primary);
        let nodes = DashMap::new();
        nodes.insert(primary.id.clone(), (0, primary.clone()));

        let registry = Self {
            nodes,
            primary,
            next_seq: AtomicU64::new(1),
        };
        for replica in replicas {
            registry.add_node(replica)?;
        }
        Ok(registry)
    }

    pub fn from_config(config: &RouterConfig) -> Result<Self, RegistryError> {
        let (primary, replicas) = nodes_from_config(config)?;
        Self::new(primary, replicas)
    }

    /// Every node, primary first, then replicas in insertion order.
    pub fn list_nodes(&self) -> Vec<Arc<ReplicaNode>> {
        let mut entries: Vec<(u64, Arc<ReplicaNode>)> = self
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, node)| node).collect()
    }

    /// Replicas in insertion order, whatever their status.
    pub fn replicas(&self) -> Vec<Arc<ReplicaNode>> {
        self.list_nodes()
            .into_iter()
            .filter(|node| !node.is_primary())
            .collect()
    }

    pub fn get_primary(&self) -> Arc<ReplicaNode> {
        self.primary.clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ReplicaNode>> {
        self.nodes.get(id).map(|entry| entry.value().1.clone())
    }

    /// Whether `node` is still the registered instance for its id.
    pub fn contains(&self, node: &Arc<ReplicaNode>) -> bool {
        self.nodes
            .get(&node.id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.value().1, node))
    }

    pub fn add_node(&self, node: ReplicaNode) -> Result<Arc<ReplicaNode>, RegistryError> {
        if node.is_primary() {
            return Err(RegistryError::PrimaryAlreadyRegistered(node.id));
        }
        match self.nodes.entry(node.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateNode(node.id)),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let node = Arc::new(node);
                tracing::info!(node = %node.id, region = %node.region, weight = node.weight, "Replica registered");
                slot.insert((seq, node.clone()));
                Ok(node)
            }
        }
    }

    /// Mark a replica Draining and remove it once its in-flight queries finish.
    ///
    /// Must be called from within a Tokio runtime when the node is busy.
    pub fn remove_node(self: &Arc<Self>, id: &str) -> Result<Removal, RegistryError> {
        if id == self.primary.id {
            return Err(RegistryError::CannotRemovePrimary(id.to_string()));
        }
        let node = self
            .get(id)
            .ok_or_else(|| RegistryError::UnknownNode(id.to_string()))?;

        node.mark_draining();
        crate::observability::metrics::record_node_status(&node.id, NodeStatus::Draining);

        if node.metrics.active_connections() == 0 {
            self.forget(&node);
            return Ok(Removal::Removed);
        }

        tracing::info!(
            node = %node.id,
            active_connections = node.metrics.active_connections(),
            "Replica draining before removal"
        );
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            node.wait_drained().await;
            registry.forget(&node);
        });
        Ok(Removal::Draining(handle))
    }

    fn forget(&self, node: &Arc<ReplicaNode>) {
        if self
            .nodes
            .remove_if(&node.id, |_, (_, current)| Arc::ptr_eq(current, node))
            .is_some()
        {
            tracing::info!(node = %node.id, "Replica removed");
        }
    }

    /// Bring the replica set in line with `desired`: unknown ids are added,
    /// registered replicas missing from `desired` are drained.
    pub fn reconcile(self: &Arc<Self>, desired: Vec<ReplicaNode>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let wanted: HashSet<NodeId> = desired.iter().map(|n| n.id.clone()).collect();

        for replica in self.replicas() {
            if !wanted.contains(&replica.id) && replica.status() != NodeStatus::Draining {
                match self.remove_node(&replica.id) {
                    Ok(_) => report.draining.push(replica.id.clone()),
                    Err(e) => tracing::warn!(node = %replica.id, error = %e, "Failed to drain replica"),
                }
            }
        }

        for node in desired {
            match self.get(&node.id) {
                Some(existing) => {
                    if existing.region != node.region || existing.weight != node.weight {
                        tracing::warn!(
                            node = %node.id,
                            "Region/weight changes for a live replica take effect after it is removed and re-added"
                        );
                    }
                }
                None => {
                    let id = node.id.clone();
                    match self.add_node(node) {
                        Ok(_) => report.added.push(id),
                        Err(e) => tracing::warn!(node = %id, error = %e, "Failed to add replica"),
                    }
                }
            }
        }
        report
    }

    /// Aggregate health for monitoring consumers.
    pub fn status(&self) -> RouterStatus {
        let nodes: Vec<NodeSnapshot> = self.list_nodes().iter().map(|n| n.snapshot()).collect();
        let replicas = nodes.iter().filter(|n| n.role == Role::Replica);
        let draining_replicas = replicas
            .clone()
            .filter(|n| n.status == NodeStatus::Draining)
            .count();
        let total_replicas = replicas.clone().count() - draining_replicas;
        let healthy_replicas = replicas
            .filter(|n| n.status == NodeStatus::Healthy)
            .count();
        let health_score_percent = if total_replicas == 0 {
            0.0
        } else {
            healthy_replicas as f64 * 100.0 / total_replicas as f64
        };

        RouterStatus {
            total_replicas,
            healthy_replicas,
            draining_replicas,
            health_score_percent,
            nodes,
        }
    }
}

/// Derive a stable node id (`host:port`) from its URL.
pub fn node_id_for(url: &Url) -> NodeId {
    match (url.host_str(), database_port(url)) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => url.to_string(),
    }
}

/// Build the primary and replica nodes described by `config`.
pub fn nodes_from_config(config: &RouterConfig) -> Result<(ReplicaNode, Vec<ReplicaNode>), RegistryError> {
    let primary_url = parse_url(&config.primary.id, &config.primary.url)?;
    let primary = ReplicaNode::primary(
        config.primary.id.clone(),
        primary_url,
        config.primary.region.clone(),
    );

    let mut replicas = Vec::with_capacity(config.replicas.urls.len());
    for (i, raw) in config.replicas.urls.iter().enumerate() {
        let url = parse_url(raw, raw)?;
        let region = config
            .replicas
            .regions
            .get(i)
            .cloned()
            .unwrap_or_else(|| config.primary.region.clone());
        let weight = config.replicas.weights.get(i).copied().unwrap_or(1);
        replicas.push(ReplicaNode::replica(node_id_for(&url), url, region, weight));
    }
    Ok((primary, replicas))
}

fn parse_url(id: &str, raw: &str) -> Result<Url, RegistryError> {
    Url::parse(raw).map_err(|e| RegistryError::InvalidNode {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(host: &str) -> Url {
        Url::parse(&format!("postgres://{host}:5432/app")).unwrap()
    }

    fn registry() -> Arc<Registry> {
        let primary = ReplicaNode::primary("p", url("p"), "us");
        let replicas = vec![
            ReplicaNode::replica("r1", url("r1"), "us", 2),
            ReplicaNode::replica("r2", url("r2"), "us", 1),
            ReplicaNode::replica("r3", url("r3"), "eu", 1),
        ];
        Arc::new(Registry::new(primary, replicas).unwrap())
    }

    #[test]
    fn test_exactly_one_primary() {
        let not_primary = ReplicaNode::replica("x", url("x"), "us", 1);
        assert_eq!(
            Registry::new(not_primary, vec![]).unwrap_err(),
            RegistryError::NotAPrimary("x".into())
        );

        let reg = registry();
        let second = ReplicaNode::primary("p2", url("p2"), "us");
        assert!(matches!(
            reg.add_node(second),
            Err(RegistryError::PrimaryAlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_list_order_is_stable() {
        let reg = registry();
        let ids: Vec<_> = reg.list_nodes().iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec!["p", "r1", "r2", "r3"]);
        assert_eq!(reg.replicas().len(), 3);
        assert_eq!(reg.get_primary().id, "p");
    }

    #[test]
    fn test_duplicate_rejected() {
        let reg = registry();
        let dup = ReplicaNode::replica("r1", url("r1"), "us", 1);
        assert_eq!(
            reg.add_node(dup).unwrap_err(),
            RegistryError::DuplicateNode("r1".into())
        );
    }

    #[test]
    fn test_remove_primary_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.remove_node("p"),
            Err(RegistryError::CannotRemovePrimary(_))
        ));
        assert!(matches!(
            reg.remove_node("nope"),
            Err(RegistryError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_remove_idle_node_is_immediate() {
        let reg = registry();
        assert!(matches!(reg.remove_node("r2"), Ok(Removal::Removed)));
        assert!(reg.get("r2").is_none());
        assert_eq!(reg.replicas().len(), 2);
    }

    #[test]
    fn test_node_picked_before_removal_cannot_be_dispatched_to() {
        let reg = registry();
        // A routing decision still holds the node when it is removed.
        let picked = reg.get("r2").unwrap();
        assert!(matches!(reg.remove_node("r2"), Ok(Removal::Removed)));

        assert!(picked.try_acquire().is_none());
        assert_eq!(picked.metrics.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_remove_busy_node_drains_first() {
        let reg = registry();
        let node = reg.get("r1").unwrap();
        let guard = node.acquire();

        let handle = match reg.remove_node("r1").unwrap() {
            Removal::Draining(handle) => handle,
            Removal::Removed => panic!("busy node must drain"),
        };
        assert_eq!(reg.get("r1").unwrap().status(), NodeStatus::Draining);

        drop(guard);
        handle.await.unwrap();
        assert!(reg.get("r1").is_none());
    }

    #[test]
    fn test_status_counts_healthy_replicas() {
        let reg = registry();
        reg.get("r3").unwrap().set_status(NodeStatus::Unhealthy);

        let status = reg.status();
        assert_eq!(status.total_replicas, 3);
        assert_eq!(status.healthy_replicas, 2);
        assert!((status.health_score_percent - 66.67).abs() < 0.01);
        assert_eq!(status.nodes.len(), 4);
    }

    #[tokio::test]
    async fn test_draining_replica_does_not_lower_health_score() {
        let reg = registry();
        let _in_flight = reg.get("r3").unwrap().acquire();
        assert!(matches!(reg.remove_node("r3"), Ok(Removal::Draining(_))));

        let status = reg.status();
        assert_eq!(status.total_replicas, 2);
        assert_eq!(status.healthy_replicas, 2);
        assert_eq!(status.draining_replicas, 1);
        assert_eq!(status.health_score_percent, 100.0);
        assert_eq!(status.nodes.len(), 4);
    }

    #[test]
    fn test_from_config_builds_nodes() {
        let mut config = RouterConfig::default();
        config.primary.url = "postgres://db-primary:5432/app".into();
        config.replicas.urls = vec![
            "postgres://db-r1:5432/app".into(),
            "postgres://db-r2/app".into(),
        ];
        config.replicas.regions = vec!["us".into(), "eu".into()];
        config.replicas.weights = vec![3];

        let reg = Registry::from_config(&config).unwrap();
        let replicas = reg.replicas();
        assert_eq!(replicas[0].id, "db-r1:5432");
        assert_eq!(replicas[0].weight, 3);
        assert_eq!(replicas[1].id, "db-r2:5432");
        assert_eq!(replicas[1].region, "eu");
        assert_eq!(replicas[1].weight, 1);
    }

    #[tokio::test]
    async fn test_reconcile_adds_and_drains() {
        let reg = registry();
        let desired = vec![
            ReplicaNode::replica("r1", url("r1"), "us", 2),
            ReplicaNode::replica("r4", url("r4"), "ap", 1),
        ];
        let report = reg.reconcile(desired);
        assert_eq!(report.added, vec!["r4".to_string()]);
        assert_eq!(report.draining, vec!["r2".to_string(), "r3".to_string()]);
        assert!(reg.get("r2").is_none());
        assert!(reg.get("r4").is_some());
    }
}
