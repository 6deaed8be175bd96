//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::RouterConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    Env { key: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply `ROUTER_*` environment overrides, then validate.
pub fn load_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: RouterConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus `ROUTER_*` environment variables.
pub fn load_from_env() -> Result<RouterConfig, ConfigError> {
    let mut config = RouterConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment settings on `config`. List values are comma separated.
pub fn apply_env_overrides<F>(config: &mut RouterConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("ROUTER_PRIMARY_URL") {
        config.primary.url = url;
    }
    if let Some(urls) = lookup("ROUTER_REPLICA_URLS") {
        config.replicas.urls = split_list(&urls);
    }
    if let Some(regions) = lookup("ROUTER_REPLICA_REGIONS") {
        config.replicas.regions = split_list(&regions);
    }
    if let Some(raw) = lookup("ROUTER_REPLICA_WEIGHTS") {
        config.replicas.weights = split_list(&raw)
            .iter()
            .map(|w| w.parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| ConfigError::Env {
                key: "ROUTER_REPLICA_WEIGHTS",
                value: raw.clone(),
            })?;
    }
    if let Some(raw) = lookup("ROUTER_STRATEGY") {
        config.strategy = raw.parse().map_err(|_| ConfigError::Env {
            key: "ROUTER_STRATEGY",
            value: raw.clone(),
        })?;
    }

    let health = &mut config.health_check;
    override_parsed(&lookup, "ROUTER_HEALTH_CHECK_INTERVAL_MS", &mut health.interval_ms)?;
    override_parsed(
        &lookup,
        "ROUTER_DEGRADED_FAILURE_THRESHOLD",
        &mut health.degraded_failure_threshold,
    )?;
    override_parsed(
        &lookup,
        "ROUTER_UNHEALTHY_FAILURE_THRESHOLD",
        &mut health.unhealthy_failure_threshold,
    )?;
    override_parsed(
        &lookup,
        "ROUTER_RECOVERY_SUCCESS_THRESHOLD",
        &mut health.recovery_success_threshold,
    )?;
    override_parsed(
        &lookup,
        "ROUTER_FALLBACK_TO_PRIMARY",
        &mut config.routing.fallback_to_primary,
    )?;
    override_parsed(&lookup, "ROUTER_LOG_LEVEL", &mut config.observability.log_level)?;

    Ok(())
}

fn override_parsed<F, T>(lookup: &F, key: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::Env {
            key,
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
