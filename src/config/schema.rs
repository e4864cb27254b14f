//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the control plane.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::{HealthStatus, ServiceInstance};

/// Root configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MeshConfig {
    /// Active health probing.
    pub health_monitor: HealthMonitorConfig,

    /// Default breaker tuning for guarded calls.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Routing table generation.
    pub routing: RoutingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Statically declared instances seeding the in-memory registry.
    pub registry: RegistryConfig,
}

/// Health prober configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Enable the background prober.
    pub enabled: bool,

    /// Delay between probe cycles in milliseconds.
    pub probe_interval_ms: u64,

    /// HTTP probe timeout in milliseconds.
    pub http_timeout_ms: u64,

    /// TCP connect timeout in milliseconds.
    pub tcp_timeout_ms: u64,

    /// Upper bound on probes in flight during one cycle.
    pub max_concurrent_probes: usize,

    /// Extra headers sent with HTTP probes, as "Name=Value".
    pub http_headers: Vec<String>,

    /// Drop cache entries for instances no longer in the registry.
    pub evict_deregistered: bool,

    /// Per-instance breaker wrapping each probe.
    pub breaker: CircuitBreakerConfig,
}

impl HealthMonitorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_timeout_ms)
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_ms: 30_000,
            http_timeout_ms: 5_000,
            tcp_timeout_ms: 3_000,
            max_concurrent_probes: 16,
            http_headers: Vec::new(),
            evict_deregistered: true,
            // Probes run once per interval, so the window must span several cycles.
            breaker: CircuitBreakerConfig {
                failure_ratio: 1.0,
                sampling_duration_ms: 300_000,
                minimum_throughput: 3,
                break_duration_ms: 60_000,
            },
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (0.0 to 1.0) at which the circuit opens.
    pub failure_ratio: f64,

    /// Sliding window for the failure ratio, in milliseconds.
    pub sampling_duration_ms: u64,

    /// Minimum calls in the window before the circuit may open.
    pub minimum_throughput: u32,

    /// How long the circuit stays open, in milliseconds.
    pub break_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_duration_ms: 30_000,
            minimum_throughput: 10,
            break_duration_ms: 30_000,
        }
    }
}

/// Routing table generator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Enable the background generator.
    pub enabled: bool,

    /// Delay after a successful cycle, in milliseconds.
    pub refresh_interval_ms: u64,

    /// Delay after a failed cycle, in milliseconds.
    pub retry_interval_ms: u64,

    /// Prefix for routed paths; "/api/" yields "/api/{service}/**".
    pub route_prefix: String,

    /// Services whose name starts with any of these (case-insensitive) are skipped.
    pub reserved_prefixes: Vec<String>,

    /// Policy hint passed to the proxy for each cluster.
    pub load_balancing_policy: String,

    /// Active health check the proxy runs on its own.
    pub health_check: ActiveHealthCheckConfig,
}

impl RoutingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_ms: 30_000,
            retry_interval_ms: 10_000,
            route_prefix: "/api/".to_string(),
            reserved_prefixes: vec!["consul".to_string()],
            load_balancing_policy: "RoundRobin".to_string(),
            health_check: ActiveHealthCheckConfig::default(),
        }
    }
}

/// Active health check policy embedded in every cluster.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActiveHealthCheckConfig {
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub policy: String,
}

impl Default for ActiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_secs: 10,
            timeout_secs: 5,
            policy: "ConsecutiveFailures".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Static registry contents.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    pub instances: Vec<InstanceConfig>,
}

/// One statically declared instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub service_name: String,
    pub service_id: String,
    pub address: String,
    pub port: u16,

    /// Initial status until the first probe lands.
    #[serde(default)]
    pub status: HealthStatus,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl From<&InstanceConfig> for ServiceInstance {
    fn from(config: &InstanceConfig) -> Self {
        let mut instance = ServiceInstance::new(
            config.service_name.clone(),
            config.service_id.clone(),
            config.address.clone(),
            config.port,
        )
        .with_status(config.status);
        instance.metadata = config.metadata.clone();
        instance
    }
}

impl RegistryConfig {
    pub fn to_instances(&self) -> Vec<ServiceInstance> {
        self.instances.iter().map(ServiceInstance::from).collect()
    }
}
