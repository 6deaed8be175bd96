//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check parallel replica lists line up
//! - Validate value ranges (thresholds ordered, ratios in range, intervals > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::RouterConfig;
use crate::registry::node_id_for;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid url '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("replicas.{field} has {actual} entries but replicas.urls has {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("replicas.weights[{index}] must be positive")]
    ZeroWeight { index: usize },

    #[error("replica '{0}' is listed more than once")]
    DuplicateReplica(String),

    #[error("replica '{0}' has the same endpoint as the primary")]
    ReplicaIsPrimary(String),

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("health_check.unhealthy_failure_threshold ({unhealthy}) must exceed degraded_failure_threshold ({degraded})")]
    ThresholdOrder { degraded: u32, unhealthy: u32 },

    #[error("{field} must be within (0, 1], got {value}")]
    RatioOutOfRange { field: &'static str, value: f64 },

    #[error("health_check.error_rate_warn ({warn}) must not exceed error_rate_hard ({hard})")]
    ErrorRateOrder { warn: f64, hard: f64 },

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check `config` for semantic problems, collecting every one found.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let primary_id = match Url::parse(&config.primary.url) {
        Ok(url) => Some(node_id_for(&url)),
        Err(e) => {
            errors.push(ValidationError::InvalidUrl {
                field: "primary.url",
                value: config.primary.url.clone(),
                reason: e.to_string(),
            });
            None
        }
    };
    if config.primary.id.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "primary.id" });
    }

    let replicas = &config.replicas;
    let mut seen = HashSet::new();
    for raw in &replicas.urls {
        match Url::parse(raw) {
            Ok(url) => {
                let id = node_id_for(&url);
                if primary_id.as_deref() == Some(id.as_str()) {
                    errors.push(ValidationError::ReplicaIsPrimary(raw.clone()));
                }
                if !seen.insert(id) {
                    errors.push(ValidationError::DuplicateReplica(raw.clone()));
                }
            }
            Err(e) => errors.push(ValidationError::InvalidUrl {
                field: "replicas.urls",
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }
    if !replicas.regions.is_empty() && replicas.regions.len() != replicas.urls.len() {
        errors.push(ValidationError::LengthMismatch {
            field: "regions",
            expected: replicas.urls.len(),
            actual: replicas.regions.len(),
        });
    }
    if !replicas.weights.is_empty() && replicas.weights.len() != replicas.urls.len() {
        errors.push(ValidationError::LengthMismatch {
            field: "weights",
            expected: replicas.urls.len(),
            actual: replicas.weights.len(),
        });
    }
    for (index, weight) in replicas.weights.iter().enumerate() {
        if *weight == 0 {
            errors.push(ValidationError::ZeroWeight { index });
        }
    }

    let health = &config.health_check;
    for (field, value) in [
        ("health_check.interval_ms", health.interval_ms),
        ("health_check.probe_timeout_ms", health.probe_timeout_ms),
        ("health_check.max_probe_backoff_ms", health.max_probe_backoff_ms),
        ("routing.session_stickiness_window_ms", config.routing.session_stickiness_window_ms),
        ("routing.dispatch_timeout_ms", config.routing.dispatch_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::MustBePositive { field });
        }
    }
    for (field, value) in [
        ("health_check.degraded_failure_threshold", health.degraded_failure_threshold),
        ("health_check.recovery_success_threshold", health.recovery_success_threshold),
    ] {
        if value == 0 {
            errors.push(ValidationError::MustBePositive { field });
        }
    }
    if health.error_window == 0 {
        errors.push(ValidationError::MustBePositive { field: "health_check.error_window" });
    }
    if health.unhealthy_failure_threshold <= health.degraded_failure_threshold {
        errors.push(ValidationError::ThresholdOrder {
            degraded: health.degraded_failure_threshold,
            unhealthy: health.unhealthy_failure_threshold,
        });
    }

    for (field, value) in [
        ("health_check.error_rate_warn", health.error_rate_warn),
        ("health_check.error_rate_hard", health.error_rate_hard),
        ("health_check.latency_ema_alpha", health.latency_ema_alpha),
        ("adaptive.error_rate_threshold", config.adaptive.error_rate_threshold),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            errors.push(ValidationError::RatioOutOfRange { field, value });
        }
    }
    if health.error_rate_warn > health.error_rate_hard {
        errors.push(ValidationError::ErrorRateOrder {
            warn: health.error_rate_warn,
            hard: health.error_rate_hard,
        });
    }
    if !(config.adaptive.p95_latency_ms > 0.0) {
        errors.push(ValidationError::MustBePositive { field: "adaptive.p95_latency_ms" });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&RouterConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = RouterConfig::default();
        config.replicas.urls = vec!["postgres://r1:5432".into(), "not a url".into()];
        config.replicas.regions = vec!["us".into()];
        config.replicas.weights = vec![1, 0];
        config.health_check.degraded_failure_threshold = 6;
        config.health_check.unhealthy_failure_threshold = 6;
        config.health_check.error_rate_warn = 0.5;
        config.health_check.error_rate_hard = 0.25;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidUrl { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::LengthMismatch { field: "regions", .. })));
        assert!(errors.contains(&ValidationError::ZeroWeight { index: 1 }));
        assert!(errors.contains(&ValidationError::ThresholdOrder { degraded: 6, unhealthy: 6 }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ErrorRateOrder { .. })));
    }

    #[test]
    fn test_duplicate_and_primary_endpoints() {
        let mut config = RouterConfig::default();
        config.primary.url = "postgres://db:5432/app".into();
        config.replicas.urls = vec![
            "postgres://db/app".into(),
            "postgres://r1:5432/a".into(),
            "postgres://r1:5432/b".into(),
        ];
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ReplicaIsPrimary("postgres://db/app".into())));
        assert!(errors.contains(&ValidationError::DuplicateReplica("postgres://r1:5432/b".into())));
    }
}
