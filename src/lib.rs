//! Service-mesh control plane library.

pub mod admin;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing;

pub use config::schema::MeshConfig;
pub use lifecycle::{ControlPlane, Shutdown};
pub use load_balancer::LoadBalancer;
pub use registry::{InMemoryRegistry, ServiceInstance, ServiceRegistry};
