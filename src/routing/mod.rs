//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! generator.rs (every refresh interval, sooner after a failure):
//!     registry → services, minus reserved names
//!     → healthy instances per service
//!     → one route + one cluster per service with healthy instances
//!     → table.rs (atomic swap + change token)
//!     → external proxy reloads from the snapshot
//! ```
//!
//! # Design Decisions
//! - Snapshots are rebuilt wholesale; a service with no healthy instances simply disappears
//! - A failed rebuild publishes nothing and keeps the previous snapshot
//! - Never on the request path

pub mod generator;
pub mod table;

pub use generator::RoutingTableGenerator;
pub use table::{ActiveHealthCheckPolicy, ClusterEntry, RouteEntry, RoutingSnapshot, RoutingTable};
