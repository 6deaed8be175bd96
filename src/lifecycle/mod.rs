//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → broadcast to every background task
//!     → health monitor, session sweeper and status loop exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Background tasks own a receiver and exit on their own
//! - In-flight dispatches are not interrupted by shutdown

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
