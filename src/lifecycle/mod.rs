//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     MeshConfig + registry → cache, breakers, load balancer, routing table
//!     → spawn prober, routing generator, admin API
//!
//! Shutdown (shutdown.rs):
//!     trigger → every loop exits at its next await → join with deadline
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → config reload
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{SignalEvent, Signals};
pub use startup::{ControlPlane, StartupError};
