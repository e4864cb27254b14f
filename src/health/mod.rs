//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! prober.rs (every probe interval):
//!     registry → every instance of every service
//!     → per-instance circuit breaker
//!     → probe.rs (HTTP GET or TCP connect)
//!     → cache.rs (last-known health)
//!     → registry.update_health_status (read by the load balancer)
//! ```
//!
//! # Design Decisions
//! - One breaker per `service_id`, kept for the process lifetime
//! - An open breaker skips the probe and reports the instance unhealthy
//! - Instances with nothing to probe are recorded as unknown

pub mod cache;
pub mod probe;
pub mod prober;

pub use cache::{HealthCache, MonitoredInstance, ProbeType};
pub use probe::{ProbeError, ProbeOutcome, Probes};
pub use prober::{CycleReport, HealthProber};
