//! Node health state machine.
//!
//! # States
//! - Healthy: full share of traffic
//! - Degraded: still routable, at reduced preference
//! - Unhealthy: excluded from balancing (last-resort fallback only)
//! - Draining: set by the registry, never changed here
//!
//! # State Transitions
//! ```text
//! Healthy → Degraded:    consecutive failures >= degraded threshold
//!                        OR windowed error rate > warn
//!                        OR replication lag > soft limit
//! Degraded → Unhealthy:  consecutive failures >= unhealthy threshold
//!                        OR windowed error rate > hard
//! Degraded → Healthy:    consecutive successes >= recovery threshold,
//!                        error rate <= warn and lag <= soft limit
//! Unhealthy → Healthy:   consecutive successes >= recovery threshold
//!                        (counters and error window reset)
//! ```
//!
//! Error-rate rules only apply once the window holds
//! `error_rate_min_samples` outcomes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::HealthCheckConfig;
use crate::observability::metrics;
use crate::registry::metrics::OutcomeCounters;
use crate::registry::{NodeStatus, ReplicaNode};

/// One health signal for a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// The node answered. Probes carry no latency so they do not skew the
    /// query latency average.
    Success { latency: Option<Duration> },
    Failure,
}

/// Why a transition fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionCause {
    ConsecutiveFailures(u32),
    ErrorRate(f64),
    ReplicationLag(u64),
    Recovered(u32),
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCause::ConsecutiveFailures(n) => write!(f, "{n} consecutive failures"),
            TransitionCause::ErrorRate(rate) => write!(f, "error rate {:.1}%", rate * 100.0),
            TransitionCause::ReplicationLag(ms) => write!(f, "replication lag {ms}ms"),
            TransitionCause::Recovered(n) => write!(f, "{n} consecutive successes"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: NodeStatus,
    pub to: NodeStatus,
    pub cause: TransitionCause,
}

/// Next status for a node in `status`, or `None` when it should stay put.
///
/// Pure function of the counters so the request path and the probe loop
/// apply exactly the same rules.
pub fn evaluate(
    status: NodeStatus,
    counters: &OutcomeCounters,
    lag_ms: u64,
    policy: &HealthCheckConfig,
) -> Option<(NodeStatus, TransitionCause)> {
    let errors = counters.errors;
    let rate_known = errors.samples >= policy.error_rate_min_samples;
    let rate = errors.rate();

    match status {
        NodeStatus::Healthy => {
            if counters.consecutive_failures >= policy.degraded_failure_threshold {
                Some((
                    NodeStatus::Degraded,
                    TransitionCause::ConsecutiveFailures(counters.consecutive_failures),
                ))
            } else if rate_known && rate > policy.error_rate_warn {
                Some((NodeStatus::Degraded, TransitionCause::ErrorRate(rate)))
            } else if lag_ms > policy.lag_soft_limit_ms {
                Some((NodeStatus::Degraded, TransitionCause::ReplicationLag(lag_ms)))
            } else {
                None
            }
        }
        NodeStatus::Degraded => {
            if counters.consecutive_failures >= policy.unhealthy_failure_threshold {
                Some((
                    NodeStatus::Unhealthy,
                    TransitionCause::ConsecutiveFailures(counters.consecutive_failures),
                ))
            } else if rate_known && rate > policy.error_rate_hard {
                Some((NodeStatus::Unhealthy, TransitionCause::ErrorRate(rate)))
            } else if counters.consecutive_successes >= policy.recovery_success_threshold
                && (!rate_known || rate <= policy.error_rate_warn)
                && lag_ms <= policy.lag_soft_limit_ms
            {
                Some((
                    NodeStatus::Healthy,
                    TransitionCause::Recovered(counters.consecutive_successes),
                ))
            } else {
                None
            }
        }
        NodeStatus::Unhealthy => {
            if counters.consecutive_successes >= policy.recovery_success_threshold {
                Some((
                    NodeStatus::Healthy,
                    TransitionCause::Recovered(counters.consecutive_successes),
                ))
            } else {
                None
            }
        }
        NodeStatus::Draining => None,
    }
}

/// Applies observations to nodes under the live health policy.
#[derive(Debug)]
pub struct HealthTracker {
    policy: ArcSwap<HealthCheckConfig>,
}

impl HealthTracker {
    pub fn new(policy: HealthCheckConfig) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
        }
    }

    pub fn policy(&self) -> Arc<HealthCheckConfig> {
        self.policy.load_full()
    }

    pub fn update_policy(&self, policy: HealthCheckConfig) {
        self.policy.store(Arc::new(policy));
    }

    /// Record an observation and run the state machine.
    pub fn observe(&self, node: &ReplicaNode, observation: Observation) -> Vec<Transition> {
        let policy = self.policy.load();
        let counters = match observation {
            Observation::Success { latency } => {
                if let Some(latency) = latency {
                    node.metrics
                        .record_latency(latency.as_secs_f64() * 1000.0, policy.latency_ema_alpha);
                }
                node.metrics.record_outcome(true, policy.error_window)
            }
            Observation::Failure => node.metrics.record_outcome(false, policy.error_window),
        };
        self.settle(node, counters, &policy)
    }

    /// Store a fresh lag estimate and re-evaluate the node.
    pub fn observe_lag(&self, node: &ReplicaNode, lag_ms: u64) -> Vec<Transition> {
        node.metrics.set_replication_lag_ms(lag_ms);
        let policy = self.policy.load();
        self.settle(node, node.metrics.counters(), &policy)
    }

    fn settle(
        &self,
        node: &ReplicaNode,
        mut counters: OutcomeCounters,
        policy: &HealthCheckConfig,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();
        // Every status is visited at most once per settle.
        for _ in 0..4 {
            let from = node.status();
            let Some((to, cause)) = evaluate(from, &counters, node.replication_lag_ms(), policy)
            else {
                break;
            };
            if !node.transition(from, to) {
                // Lost a race with another observer; re-read and try again.
                counters = node.metrics.counters();
                continue;
            }
            if from == NodeStatus::Unhealthy {
                node.metrics.reset_failures();
                counters = node.metrics.counters();
            }

            log_transition(node, from, to, &cause);
            metrics::record_node_status(&node.id, to);
            transitions.push(Transition { from, to, cause });
        }
        transitions
    }
}

fn log_transition(node: &ReplicaNode, from: NodeStatus, to: NodeStatus, cause: &TransitionCause) {
    if to == NodeStatus::Healthy {
        tracing::info!(node = %node.id, role = %node.role, from = %from, to = %to, cause = %cause, "Node recovered");
    } else {
        tracing::warn!(node = %node.id, role = %node.role, from = %from, to = %to, cause = %cause, "Node health degraded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn node() -> ReplicaNode {
        ReplicaNode::replica("r1", Url::parse("postgres://r1:5432").unwrap(), "us", 1)
    }

    fn tracker() -> HealthTracker {
        HealthTracker::new(HealthCheckConfig::default())
    }

    fn fail(t: &HealthTracker, n: &ReplicaNode, times: u32) {
        for _ in 0..times {
            t.observe(n, Observation::Failure);
        }
    }

    fn succeed(t: &HealthTracker, n: &ReplicaNode, times: u32) {
        for _ in 0..times {
            t.observe(n, Observation::Success { latency: None });
        }
    }

    #[test]
    fn test_failure_thresholds() {
        let t = tracker();
        let n = node();

        fail(&t, &n, 2);
        assert_eq!(n.status(), NodeStatus::Healthy);
        fail(&t, &n, 1);
        assert_eq!(n.status(), NodeStatus::Degraded);
        fail(&t, &n, 2);
        assert_eq!(n.status(), NodeStatus::Degraded);
        fail(&t, &n, 1);
        assert_eq!(n.status(), NodeStatus::Unhealthy);
    }

    #[test]
    fn test_recovery_resets_counters() {
        let t = tracker();
        let n = node();
        fail(&t, &n, 6);
        assert_eq!(n.status(), NodeStatus::Unhealthy);

        succeed(&t, &n, 1);
        assert_eq!(n.status(), NodeStatus::Unhealthy);
        let transitions = t.observe(&n, Observation::Success { latency: None });
        assert_eq!(n.status(), NodeStatus::Healthy);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].cause, TransitionCause::Recovered(2));
        assert_eq!(n.metrics.error_sample().samples, 0);
        assert_eq!(n.metrics.consecutive_successes(), 0);
    }

    #[test]
    fn test_error_rate_needs_min_samples() {
        let t = tracker();
        let n = node();
        // 2 failures in 10 outcomes is 20%, but below the sample floor.
        for i in 0..10 {
            if i % 5 == 0 {
                fail(&t, &n, 1);
            } else {
                succeed(&t, &n, 1);
            }
        }
        assert_eq!(n.status(), NodeStatus::Healthy);

        for i in 0..10 {
            if i % 5 == 0 {
                fail(&t, &n, 1);
            } else {
                succeed(&t, &n, 1);
            }
        }
        assert_eq!(n.status(), NodeStatus::Degraded);
    }

    #[test]
    fn test_error_rate_hard_limit_jumps_to_unhealthy() {
        let mut policy = HealthCheckConfig::default();
        policy.error_rate_min_samples = 4;
        let t = HealthTracker::new(policy);
        let n = node();

        succeed(&t, &n, 2);
        fail(&t, &n, 2);
        // 50% > hard limit: Healthy → Degraded → Unhealthy in one settle.
        assert_eq!(n.status(), NodeStatus::Unhealthy);
    }

    #[test]
    fn test_lag_degrades_and_recovers() {
        let t = tracker();
        let n = node();
        succeed(&t, &n, 2);

        let transitions = t.observe_lag(&n, 15_000);
        assert_eq!(n.status(), NodeStatus::Degraded);
        assert_eq!(transitions[0].cause, TransitionCause::ReplicationLag(15_000));

        t.observe_lag(&n, 500);
        assert_eq!(n.status(), NodeStatus::Healthy);
    }

    #[test]
    fn test_draining_is_never_overridden() {
        let t = tracker();
        let n = node();
        n.mark_draining();
        fail(&t, &n, 10);
        succeed(&t, &n, 10);
        assert_eq!(n.status(), NodeStatus::Draining);
    }

    #[test]
    fn test_success_latency_feeds_ema() {
        let t = tracker();
        let n = node();
        t.observe(&n, Observation::Success { latency: Some(Duration::from_millis(40)) });
        t.observe(&n, Observation::Success { latency: None });
        assert_eq!(n.metrics.latency_ms(), 40.0);
    }
}
