//! Service registry boundary.
//!
//! # Data Flow
//! ```text
//! External registry (Consul, gRPC, static config)
//!     → ServiceRegistry trait (instances per service, service names)
//!     → health prober / load balancer / routing generator read it
//!     ← health prober publishes probe results via update_health_status
//! ```
//!
//! # Design Decisions
//! - The registry owns `ServiceInstance`; this crate only reads snapshots of it
//! - `service_id` must be unique across the whole mesh, not just per service
//! - Metadata is a flat string map; recognized keys are listed in `metadata`

pub mod memory;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryRegistry;

/// Metadata keys read from `ServiceInstance::metadata`.
pub mod metadata {
    /// Path probed over HTTP (e.g. "/health").
    pub const HEALTH_CHECK_ENDPOINT: &str = "health_check_endpoint";
    /// "http" or "https"; defaults to "http".
    pub const SCHEME: &str = "scheme";
    /// Port for TCP connect probes.
    pub const TCP_PORT: &str = "tcp_port";
    /// Load balancing strategy name.
    pub const LB_STRATEGY: &str = "lb_strategy";
    /// Positive integer weight for weighted round-robin.
    pub const WEIGHT: &str = "weight";

    pub const DEFAULT_SCHEME: &str = "http";
}

/// Health classification of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running, addressable replica of a named service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: String,
    /// Unique across the whole mesh.
    pub service_id: String,
    pub address: String,
    pub port: u16,
    pub status: HealthStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub registered_at: SystemTime,
    pub last_health_check: SystemTime,
}

impl ServiceInstance {
    /// Create an instance with `Unknown` status and no metadata.
    pub fn new(
        service_name: impl Into<String>,
        service_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            service_name: service_name.into(),
            service_id: service_id.into(),
            address: address.into(),
            port,
            status: HealthStatus::Unknown,
            metadata: HashMap::new(),
            registered_at: now,
            last_health_check: now,
        }
    }

    pub fn with_status(mut self, status: HealthStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata value.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// The `scheme` metadata hint, defaulting to "http".
    pub fn scheme(&self) -> &str {
        self.meta(metadata::SCHEME)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(metadata::DEFAULT_SCHEME)
    }

    /// `{scheme}://{address}:{port}`.
    pub fn base_address(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.address, self.port)
    }
}

/// Errors surfaced by a registry implementation.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry could not be reached or answered with an error.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// No instance with the given id is registered.
    #[error("unknown service instance: {0}")]
    UnknownInstance(String),

    /// The id is already registered under another service.
    #[error("service id '{service_id}' already registered for service '{existing_service}'")]
    DuplicateServiceId {
        service_id: String,
        existing_service: String,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Contract consumed from the external service registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// All instances registered under `service_name`, regardless of health.
    async fn get_service_instances(&self, service_name: &str) -> RegistryResult<Vec<ServiceInstance>>;

    /// Names of every registered service.
    async fn get_all_services(&self) -> RegistryResult<Vec<String>>;

    /// Publish a health result upstream. Returns false if the registry ignored it.
    async fn update_health_status(&self, service_id: &str, status: HealthStatus) -> RegistryResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_defaults_to_http() {
        let instance = ServiceInstance::new("orders", "o1", "10.0.0.1", 8080);
        assert_eq!(instance.scheme(), "http");
        assert_eq!(instance.base_address(), "http://10.0.0.1:8080");

        let tls = instance.with_metadata(metadata::SCHEME, "https");
        assert_eq!(tls.base_address(), "https://10.0.0.1:8080");
    }

    #[test]
    fn test_health_status_serde() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
        let parsed: HealthStatus = serde_json::from_str("\"healthy\"").unwrap();
        assert_eq!(parsed, HealthStatus::Healthy);
    }
}
