//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch to a node:
//!     → timeouts.rs (caller deadline and cancellation)
//!     → On failure: retries.rs (retryable? attempts left?)
//!     → Router re-routes excluding the failed node
//!
//! Probe loop:
//!     → backoff.rs (exponential delay while a node is Unhealthy)
//! ```
//!
//! # Design Decisions
//! - Every dispatch has a deadline
//! - Only reads are retried, and never on the node that just failed
//! - Retries re-route immediately; backoff is for probes only

pub mod backoff;
pub mod retries;
pub mod timeouts;
