//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging with ids as fields for machine parsing
//! - Metrics are cheap (atomic increments behind the facade)
//! - Breaker transitions are both logged and counted

pub mod logging;
pub mod metrics;
