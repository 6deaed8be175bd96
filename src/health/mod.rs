//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Per-node probe task
//!     → Prober::probe
//!     → lag.rs (estimate replication lag from the report)
//!     → state.rs
//!
//! Passive health checks (passive.rs):
//!     Dispatch outcome observed
//!     → Map to an observation (cancellation is ignored)
//!     → state.rs
//!
//! State machine (state.rs):
//!     Healthy → Degraded → Unhealthy → (probes) → Healthy
//!     Degraded → Healthy once successes return and the node is fresh again
//! ```
//!
//! # Design Decisions
//! - Probes and dispatch outcomes feed the same per-node counters
//! - State transitions are compare-and-set; Draining is never overridden
//! - Health never raises errors to callers; it is read through `status()`

pub mod active;
pub mod lag;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use lag::LagEstimator;
pub use passive::DispatchOutcome;
pub use state::{evaluate, HealthTracker, Observation, Transition, TransitionCause};
