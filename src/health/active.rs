//! Active health checking.
//!
//! # Responsibilities
//! - Run one probe task per registered node, off the request path
//! - Start tasks for nodes added at runtime; let tasks of removed nodes exit
//! - Back off exponentially while a node is Unhealthy
//! - Feed probe results and lag estimates into the shared health state

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::client::Prober;
use crate::error::DispatchError;
use crate::health::lag::LagEstimator;
use crate::health::state::{HealthTracker, Observation};
use crate::observability::metrics;
use crate::registry::{NodeId, NodeStatus, Registry, ReplicaNode};
use crate::resilience::backoff::calculate_backoff;

pub struct HealthMonitor<P> {
    registry: Arc<Registry>,
    tracker: Arc<HealthTracker>,
    lag: Arc<LagEstimator>,
    prober: Arc<P>,
}

impl<P> Clone for HealthMonitor<P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            tracker: self.tracker.clone(),
            lag: self.lag.clone(),
            prober: self.prober.clone(),
        }
    }
}

impl<P: Prober> HealthMonitor<P> {
    pub fn new(
        registry: Arc<Registry>,
        tracker: Arc<HealthTracker>,
        lag: Arc<LagEstimator>,
        prober: P,
    ) -> Self {
        Self {
            registry,
            tracker,
            lag,
            prober: Arc::new(prober),
        }
    }

    /// Supervise probe tasks until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let interval_ms = self.tracker.policy().interval_ms;
        tracing::info!(interval_ms, nodes = self.registry.list_nodes().len(), "Health monitor starting");

        let cancel = CancellationToken::new();
        let mut tasks: HashMap<NodeId, (Arc<ReplicaNode>, JoinHandle<()>)> = HashMap::new();
        let mut ticker = time::interval(Duration::from_millis(interval_ms.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sync_tasks(&mut tasks, &cancel),
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        cancel.cancel();
        for (_, (_, handle)) in tasks {
            let _ = handle.await;
        }
    }

    fn sync_tasks(
        &self,
        tasks: &mut HashMap<NodeId, (Arc<ReplicaNode>, JoinHandle<()>)>,
        cancel: &CancellationToken,
    ) {
        tasks.retain(|_, (node, handle)| !handle.is_finished() && self.registry.contains(node));

        for node in self.registry.list_nodes() {
            let current = tasks
                .get(&node.id)
                .is_some_and(|(tracked, _)| Arc::ptr_eq(tracked, &node));
            if current {
                continue;
            }
            tracing::debug!(node = %node.id, "Starting probe task");
            let monitor = self.clone();
            let token = cancel.child_token();
            let probed = node.clone();
            let handle = tokio::spawn(async move { monitor.probe_loop(probed, token).await });
            tasks.insert(node.id.clone(), (node, handle));
        }
    }

    async fn probe_loop(self, node: Arc<ReplicaNode>, cancel: CancellationToken) {
        let mut unhealthy_attempts = 0u32;
        while self.registry.contains(&node) {
            if node.status() != NodeStatus::Draining {
                self.probe_once(&node).await;
            }

            let policy = self.tracker.policy();
            let interval = Duration::from_millis(policy.interval_ms);
            let delay = if node.status() == NodeStatus::Unhealthy {
                unhealthy_attempts = unhealthy_attempts.saturating_add(1);
                calculate_backoff(
                    unhealthy_attempts,
                    interval,
                    Duration::from_millis(policy.max_probe_backoff_ms),
                )
            } else {
                unhealthy_attempts = 0;
                interval
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        }
        tracing::debug!(node = %node.id, "Probe task exiting");
    }

    /// Probe `node` once and apply the result. Returns whether it answered.
    pub async fn probe_once(&self, node: &ReplicaNode) -> bool {
        let timeout = Duration::from_millis(self.tracker.policy().probe_timeout_ms);
        let result = match time::timeout(timeout, self.prober.probe(node)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Connection(format!(
                "probe timed out after {timeout:?}"
            ))),
        };

        match result {
            Ok(report) => {
                self.tracker
                    .observe(node, Observation::Success { latency: None });
                if node.is_primary() {
                    self.lag.record_primary(&report);
                } else if let Some(lag_ms) = self.lag.estimate(node, &report) {
                    self.tracker.observe_lag(node, lag_ms);
                }
                metrics::record_probe(&node.id, true);
                true
            }
            Err(e) => {
                tracing::debug!(node = %node.id, error = %e, "Health probe failed");
                self.tracker.observe(node, Observation::Failure);
                metrics::record_probe(&node.id, false);
                false
            }
        }
    }
}
