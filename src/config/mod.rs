//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + ROUTER_* environment
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → registry / health tracker / router
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Router::apply_config swaps policies and reconciles replicas
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AdaptiveConfig, HealthCheckConfig, ObservabilityConfig, PrimaryConfig, ReplicasConfig,
    RouterConfig, RoutingConfig, StrategyKind,
};
