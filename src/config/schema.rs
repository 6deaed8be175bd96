//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for the replica router.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// The single writable node.
    pub primary: PrimaryConfig,

    /// Read replicas (parallel lists).
    pub replicas: ReplicasConfig,

    /// Load balancing strategy for replica reads.
    pub strategy: StrategyKind,

    /// Health check settings and state machine thresholds.
    pub health_check: HealthCheckConfig,

    /// Consistency, failover and retry behaviour.
    pub routing: RoutingConfig,

    /// Thresholds used by the adaptive strategy.
    pub adaptive: AdaptiveConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Primary node configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub id: String,
    pub url: String,
    pub region: String,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            id: "primary".to_string(),
            url: "postgres://localhost:5432/postgres".to_string(),
            region: "default".to_string(),
        }
    }
}

/// Replica definitions. `regions` and `weights` are optional and, when
/// present, parallel to `urls`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReplicasConfig {
    pub urls: Vec<String>,
    pub regions: Vec<String>,
    pub weights: Vec<u32>,
}

/// Selectable load balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    RoundRobin,
    LeastConnections,
    Geographic,
    #[default]
    Adaptive,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round-robin",
            StrategyKind::LeastConnections => "least-connections",
            StrategyKind::Geographic => "geographic",
            StrategyKind::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "round_robin" | "roundrobin" => Ok(StrategyKind::RoundRobin),
            "least-connections" | "least_connections" | "leastconnections" => {
                Ok(StrategyKind::LeastConnections)
            }
            "geographic" => Ok(StrategyKind::Geographic),
            "adaptive" => Ok(StrategyKind::Adaptive),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Probe interval for Healthy/Degraded nodes in milliseconds.
    pub interval_ms: u64,

    /// Upper bound for a single probe in milliseconds.
    pub probe_timeout_ms: u64,

    /// Consecutive failures before Healthy → Degraded.
    pub degraded_failure_threshold: u32,

    /// Consecutive failures before Degraded → Unhealthy.
    pub unhealthy_failure_threshold: u32,

    /// Consecutive successes before a node is restored to Healthy.
    pub recovery_success_threshold: u32,

    /// Windowed error rate that degrades a healthy node.
    pub error_rate_warn: f64,

    /// Windowed error rate that marks a degraded node unhealthy.
    pub error_rate_hard: f64,

    /// Number of recent outcomes kept per node.
    pub error_window: usize,

    /// Rate thresholds only apply once this many outcomes are in the window.
    pub error_rate_min_samples: usize,

    /// Replication lag above which a healthy replica is degraded.
    pub lag_soft_limit_ms: u64,

    /// Ceiling for the probe backoff while a node is unhealthy.
    pub max_probe_backoff_ms: u64,

    /// Smoothing factor for the latency moving average.
    pub latency_ema_alpha: f64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            probe_timeout_ms: 2_000,
            degraded_failure_threshold: 3,
            unhealthy_failure_threshold: 6,
            recovery_success_threshold: 2,
            error_rate_warn: 0.05,
            error_rate_hard: 0.25,
            error_window: 100,
            error_rate_min_samples: 20,
            lag_soft_limit_ms: 10_000,
            max_probe_backoff_ms: 60_000,
            latency_ema_alpha: 0.2,
        }
    }
}

/// Routing behaviour.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Route to the primary when no replica qualifies.
    pub fallback_to_primary: bool,

    /// Allow unhealthy replicas as a final fallback target.
    pub unhealthy_last_resort: bool,

    /// How long a session's reads stick to the primary after it writes.
    pub session_stickiness_window_ms: u64,

    /// Extra attempts for a read after a connection error.
    pub max_retries: u32,

    /// Whether timed-out reads are retried on another node by default.
    pub retry_on_timeout: bool,

    /// Default per-query deadline in milliseconds.
    pub dispatch_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_to_primary: true,
            unhealthy_last_resort: false,
            session_stickiness_window_ms: 5_000,
            max_retries: 2,
            retry_on_timeout: false,
            dispatch_timeout_ms: 30_000,
        }
    }
}

/// Adaptive strategy thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Aggregate error rate above which least-connections takes over.
    pub error_rate_threshold: f64,

    /// p95 latency (ms) above which least-connections takes over.
    pub p95_latency_ms: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.05,
            p95_latency_ms: 250.0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
