//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → status() snapshots for alerting
//! ```
//!
//! # Design Decisions
//! - Structured fields (`node`, `status`, `strategy`) on every routing event
//! - Metric calls are no-ops until a recorder is installed
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
