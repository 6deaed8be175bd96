//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! select / mutate (statement + options)
//!     → intent.rs (QueryIntent)
//!     → consistency controller (primary, or eligible replicas)
//!     → failover.rs (balancer pick, then the fallback chain)
//!     → decision.rs (RoutingDecision or NoEligibleNode)
//!     → router.rs dispatch (guard, deadline, passive health, retries)
//! ```
//!
//! # Design Decisions
//! - The routing decision is synchronous and lock-free; only dispatch awaits
//! - A decision is either complete or an explicit error, never partial
//! - Every fallback step is recorded with its reason

pub mod decision;
pub mod failover;
pub mod intent;
pub mod router;

pub use decision::{DecisionReason, FailoverStage, FallbackStep, RoutingDecision};
pub use failover::FailoverManager;
pub use intent::{Consistency, QueryIntent, ReadOptions, WriteOptions};
pub use router::Router;
