//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use replica_router::client::{Executor, ProbeReport, Prober, Statement};
use replica_router::config::{RouterConfig, StrategyKind};
use replica_router::error::DispatchError;
use replica_router::{ReplicaNode, Router};

pub const PRIMARY: &str = "primary";

/// Node id the registry derives for a replica host.
pub fn id(host: &str) -> String {
    format!("{host}:5432")
}

/// How a mock node answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    FailConnection,
    Reject(String),
    Hang,
    Delay(Duration),
}

/// Programmable executor. Answers with the id of the node that ran the query.
#[derive(Debug, Default)]
pub struct MockExecutor {
    behaviors: DashMap<String, Behavior>,
    calls: DashMap<String, usize>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, node: &str, behavior: Behavior) {
        self.behaviors.insert(node.to_string(), behavior);
    }

    pub fn calls(&self, node: &str) -> usize {
        self.calls.get(node).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    type Output = String;

    async fn execute(&self, node: &ReplicaNode, _statement: &Statement) -> Result<String, DispatchError> {
        *self.calls.entry(node.id.clone()).or_insert(0) += 1;
        let behavior = self
            .behaviors
            .get(&node.id)
            .map(|b| b.value().clone())
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(node.id.clone()),
            Behavior::FailConnection => Err(DispatchError::Connection("connection reset".into())),
            Behavior::Reject(message) => Err(DispatchError::Query(message)),
            Behavior::Hang => std::future::pending().await,
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(node.id.clone())
            }
        }
    }
}

/// Programmable prober: nodes are up unless marked down.
#[derive(Debug, Default)]
pub struct MockProber {
    down: DashMap<String, bool>,
    reports: DashMap<String, ProbeReport>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, node: &str, down: bool) {
        self.down.insert(node.to_string(), down);
    }

    pub fn set_last_commit(&self, node: &str, at: SystemTime) {
        self.reports.insert(
            node.to_string(),
            ProbeReport {
                last_commit: Some(at),
                replication_lag: None,
            },
        );
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, node: &ReplicaNode) -> Result<ProbeReport, DispatchError> {
        if self.down.get(&node.id).is_some_and(|d| *d) {
            return Err(DispatchError::Connection("probe refused".into()));
        }
        Ok(self.reports.get(&node.id).map(|r| *r).unwrap_or_default())
    }
}

/// Config with a primary in `us` and one replica per `(host, region, weight)`.
pub fn cluster_config(replicas: &[(&str, &str, u32)], strategy: StrategyKind) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.primary.id = PRIMARY.to_string();
    config.primary.url = "postgres://db-primary:5432/app".to_string();
    config.primary.region = "us".to_string();
    config.strategy = strategy;
    for (host, region, weight) in replicas {
        config.replicas.urls.push(format!("postgres://{host}:5432/app"));
        config.replicas.regions.push(region.to_string());
        config.replicas.weights.push(*weight);
    }
    config
}

/// Three equal-weight replicas, two in `us` and one in `eu`.
pub fn three_replicas(strategy: StrategyKind) -> RouterConfig {
    cluster_config(&[("r1", "us", 1), ("r2", "us", 1), ("r3", "eu", 1)], strategy)
}

pub fn router(config: &RouterConfig) -> Router<MockExecutor> {
    Router::new(config, MockExecutor::new()).unwrap()
}
