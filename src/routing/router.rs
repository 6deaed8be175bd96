//! The router: composition root for consistency, balancing, failover and
//! dispatch.
//!
//! # Responsibilities
//! - Turn a statement plus options into a routing decision
//! - Dispatch with a connection guard, a deadline and cancellation
//! - Feed every outcome back into node health
//! - Retry failed reads on a different node
//! - Swap policies and reconcile replicas on config reload
//!
//! # Design Decisions
//! - One explicitly constructed instance; no globals
//! - Policies live in `ArcSwap` cells so reloads never block routing
//! - The executor is the only code that awaits the network

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::client::{Executor, Prober, Statement};
use crate::config::{RouterConfig, RoutingConfig};
use crate::consistency::{ConsistencyController, ConsistencyPlan, SessionTracker};
use crate::error::{DispatchError, RegistryError, RouterError};
use crate::health::{passive, DispatchOutcome, HealthMonitor, HealthTracker, LagEstimator};
use crate::load_balancer::Balancer;
use crate::observability::metrics;
use crate::registry::{nodes_from_config, NodeId, ReconcileReport, Registry, RouterStatus};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::{run_with_deadline, Interrupted};
use crate::routing::decision::RoutingDecision;
use crate::routing::failover::FailoverManager;
use crate::routing::intent::{QueryIntent, ReadOptions, WriteOptions};

pub struct Router<E> {
    registry: Arc<Registry>,
    tracker: Arc<HealthTracker>,
    lag: Arc<LagEstimator>,
    controller: ConsistencyController,
    balancer: ArcSwap<Balancer>,
    routing: ArcSwap<RoutingConfig>,
    executor: Arc<E>,
}

impl<E> Router<E> {
    /// Build a router and its registry from `config`.
    pub fn new(config: &RouterConfig, executor: E) -> Result<Self, RegistryError> {
        let registry = Arc::new(Registry::from_config(config)?);
        Ok(Self::with_registry(registry, config, executor))
    }

    /// Build a router over an existing registry.
    pub fn with_registry(registry: Arc<Registry>, config: &RouterConfig, executor: E) -> Self {
        let sessions = Arc::new(SessionTracker::new());
        Self {
            registry,
            tracker: Arc::new(HealthTracker::new(config.health_check.clone())),
            lag: Arc::new(LagEstimator::new()),
            controller: ConsistencyController::new(sessions),
            balancer: ArcSwap::from_pointee(Balancer::from_config(config.strategy, &config.adaptive)),
            routing: ArcSwap::from_pointee(config.routing.clone()),
            executor: Arc::new(executor),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    pub fn lag_estimator(&self) -> &Arc<LagEstimator> {
        &self.lag
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        self.controller.sessions()
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub fn routing_config(&self) -> Arc<RoutingConfig> {
        self.routing.load_full()
    }

    /// Aggregate health for monitoring consumers.
    pub fn status(&self) -> RouterStatus {
        self.registry.status()
    }

    /// Decide where `intent` goes without dispatching anything.
    pub fn route(&self, intent: &QueryIntent) -> Result<RoutingDecision, RouterError> {
        self.route_excluding(intent, &HashSet::new())
    }

    /// Like [`route`](Self::route), skipping nodes that already failed.
    pub fn route_excluding(
        &self,
        intent: &QueryIntent,
        excluded: &HashSet<NodeId>,
    ) -> Result<RoutingDecision, RouterError> {
        let routing = self.routing.load();
        let window = Duration::from_millis(routing.session_stickiness_window_ms);

        let decision = match self.controller.plan(&self.registry, intent, window)? {
            ConsistencyPlan::Primary(reason) => {
                RoutingDecision::direct(self.registry.get_primary(), reason)
            }
            ConsistencyPlan::Replicas {
                eligible,
                max_staleness_ms,
            } => {
                let balancer = self.balancer.load();
                FailoverManager::new(&self.registry, &balancer, &routing, excluded).resolve(
                    intent,
                    &eligible,
                    max_staleness_ms,
                )?
            }
        };

        metrics::record_decision(decision.strategy_used.label(), decision.reason.as_str());
        tracing::debug!(
            node = %decision.target.id,
            strategy = %decision.strategy_used,
            reason = %decision.reason,
            fallback_steps = decision.fallback_steps.len(),
            "Routing decision"
        );
        Ok(decision)
    }

    /// Apply a reloaded configuration: swap policies and reconcile replicas.
    /// The primary is fixed for the lifetime of the router.
    pub fn apply_config(&self, config: &RouterConfig) -> ReconcileReport {
        self.tracker.update_policy(config.health_check.clone());
        self.routing.store(Arc::new(config.routing.clone()));
        self.balancer
            .store(Arc::new(Balancer::from_config(config.strategy, &config.adaptive)));

        let report = match nodes_from_config(config) {
            Ok((primary, replicas)) => {
                if primary.url != self.registry.get_primary().url {
                    tracing::warn!(
                        url = %primary.url,
                        "Primary changes require a restart; keeping the current primary"
                    );
                }
                self.registry.reconcile(replicas)
            }
            Err(e) => {
                tracing::error!(error = %e, "Replica list rejected; keeping current replicas");
                ReconcileReport::default()
            }
        };

        tracing::info!(
            strategy = %config.strategy,
            added = report.added.len(),
            draining = report.draining.len(),
            "Configuration applied"
        );
        report
    }

    /// A health monitor sharing this router's registry and health state.
    pub fn health_monitor<P: Prober>(&self, prober: P) -> HealthMonitor<P> {
        HealthMonitor::new(
            self.registry.clone(),
            self.tracker.clone(),
            self.lag.clone(),
            prober,
        )
    }

    pub fn spawn_health_monitor<P: Prober>(
        &self,
        prober: P,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.health_monitor(prober).run(shutdown))
    }

    /// Periodically drop sessions whose stickiness window has passed.
    pub fn spawn_session_sweeper(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let sessions = self.sessions().clone();
        let window = Duration::from_millis(self.routing.load().session_stickiness_window_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = time::interval(window);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = sessions.prune(window);
                        if pruned > 0 {
                            tracing::debug!(pruned, remaining = sessions.len(), "Pruned expired sessions");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

impl<E: Executor> Router<E> {
    /// Read with default options: eventual consistency, unbounded staleness.
    pub async fn select(&self, statement: impl Into<Statement>) -> Result<E::Output, RouterError> {
        self.select_with(statement, ReadOptions::default()).await
    }

    pub async fn select_with(
        &self,
        statement: impl Into<Statement>,
        options: ReadOptions,
    ) -> Result<E::Output, RouterError> {
        let statement = statement.into();
        let routing = self.routing.load_full();
        let policy = RetryPolicy::for_read(&routing, options.retry_on_timeout);
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(routing.dispatch_timeout_ms));

        self.dispatch(&options.intent(), &statement, timeout, &options.cancel, policy)
            .await
    }

    /// Write; always targets the primary and is never retried.
    pub async fn mutate(&self, statement: impl Into<Statement>) -> Result<E::Output, RouterError> {
        self.mutate_with(statement, WriteOptions::default()).await
    }

    pub async fn mutate_with(
        &self,
        statement: impl Into<Statement>,
        options: WriteOptions,
    ) -> Result<E::Output, RouterError> {
        let statement = statement.into();
        let timeout = options.timeout.unwrap_or(Duration::from_millis(
            self.routing.load().dispatch_timeout_ms,
        ));

        let result = self
            .dispatch(
                &options.intent(),
                &statement,
                timeout,
                &options.cancel,
                RetryPolicy::for_write(),
            )
            .await;

        // Unless the primary rejected it, the write may have landed.
        if let Some(session) = options.session {
            if !matches!(result, Err(RouterError::Query { .. })) {
                self.sessions().record_write(session);
            }
        }
        result
    }

    async fn dispatch(
        &self,
        intent: &QueryIntent,
        statement: &Statement,
        timeout: Duration,
        cancel: &CancellationToken,
        policy: RetryPolicy,
    ) -> Result<E::Output, RouterError> {
        let mut excluded: HashSet<NodeId> = HashSet::new();
        let mut last_error = None;
        let mut attempt = 0;

        loop {
            let decision = match self.route_excluding(intent, &excluded) {
                Ok(decision) => decision,
                Err(e) => return Err(last_error.unwrap_or(e)),
            };
            let node = decision.target;
            if excluded.contains(&node.id) {
                // Only the node that already failed is allowed.
                break;
            }

            let Some(guard) = node.try_acquire() else {
                // Removed between the decision and the dispatch; not an attempt.
                tracing::debug!(node = %node.id, "Selected node started draining; re-routing");
                excluded.insert(node.id.clone());
                continue;
            };
            let started = Instant::now();
            let result = run_with_deadline(self.executor.execute(&node, statement), timeout, cancel).await;
            let elapsed = started.elapsed();
            drop(guard);

            let (outcome, result) = match result {
                Ok(Ok(output)) => (DispatchOutcome::Completed { latency: elapsed }, Ok(output)),
                Ok(Err(DispatchError::Query(message))) => (
                    DispatchOutcome::QueryRejected { latency: elapsed },
                    Err(RouterError::Query {
                        node: node.id.clone(),
                        message,
                    }),
                ),
                Ok(Err(DispatchError::Connection(message))) => (
                    DispatchOutcome::ConnectionFailed,
                    Err(RouterError::Connection {
                        node: node.id.clone(),
                        message,
                    }),
                ),
                Err(Interrupted::TimedOut(limit)) => (
                    DispatchOutcome::TimedOut,
                    Err(RouterError::Timeout {
                        node: node.id.clone(),
                        timeout: limit,
                    }),
                ),
                Err(Interrupted::Cancelled) => (DispatchOutcome::Cancelled, Err(RouterError::Cancelled)),
            };
            passive::report(&self.tracker, &node, outcome);
            metrics::record_dispatch(node.role.as_str(), outcome.label(), elapsed);

            match result {
                Ok(output) => return Ok(output),
                Err(err) if policy.should_retry(attempt, &err) => {
                    tracing::warn!(
                        node = %node.id,
                        attempt = attempt + 1,
                        error = %err,
                        "Dispatch failed; retrying on another node"
                    );
                    excluded.insert(node.id.clone());
                    last_error = Some(err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(RouterError::NoEligibleNode { steps: Vec::new() }))
    }
}
