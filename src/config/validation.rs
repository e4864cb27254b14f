//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ratios in range, ports valid)
//! - Enforce mesh-wide uniqueness of static `service_id`s
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MeshConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, MeshConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: String },

    #[error("{field} must be within (0.0, 1.0], got {value}")]
    RatioOutOfRange { field: String, value: f64 },

    #[error("{field} is not a valid socket address: '{value}'")]
    InvalidAddress { field: String, value: String },

    #[error("{field} must not be empty")]
    Empty { field: String },

    #[error("duplicate service_id '{service_id}' in registry.instances")]
    DuplicateServiceId { service_id: String },

    #[error("{field} must start with '/', got '{value}'")]
    MissingLeadingSlash { field: String, value: String },

    #[error("registry.instances[{index}].port must be non-zero")]
    InvalidPort { index: usize },
}

/// Validate a full configuration, collecting every error.
pub fn validate_config(config: &MeshConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let hm = &config.health_monitor;
    positive(&mut errors, "health_monitor.probe_interval_ms", hm.probe_interval_ms);
    positive(&mut errors, "health_monitor.http_timeout_ms", hm.http_timeout_ms);
    positive(&mut errors, "health_monitor.tcp_timeout_ms", hm.tcp_timeout_ms);
    positive(&mut errors, "health_monitor.max_concurrent_probes", hm.max_concurrent_probes as u64);
    validate_breaker(&mut errors, "health_monitor.breaker", &hm.breaker);
    validate_breaker(&mut errors, "circuit_breaker", &config.circuit_breaker);

    let routing = &config.routing;
    positive(&mut errors, "routing.refresh_interval_ms", routing.refresh_interval_ms);
    positive(&mut errors, "routing.retry_interval_ms", routing.retry_interval_ms);
    positive(&mut errors, "routing.health_check.interval_secs", routing.health_check.interval_secs);
    positive(&mut errors, "routing.health_check.timeout_secs", routing.health_check.timeout_secs);
    if !routing.route_prefix.starts_with('/') {
        errors.push(ValidationError::MissingLeadingSlash {
            field: "routing.route_prefix".to_string(),
            value: routing.route_prefix.clone(),
        });
    }

    if config.observability.metrics_enabled {
        socket_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::Empty {
                field: "admin.api_key".to_string(),
            });
        }
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (index, instance) in config.registry.instances.iter().enumerate() {
        if instance.service_id.trim().is_empty() {
            errors.push(ValidationError::Empty {
                field: format!("registry.instances[{}].service_id", index),
            });
        }
        if instance.service_name.trim().is_empty() {
            errors.push(ValidationError::Empty {
                field: format!("registry.instances[{}].service_name", index),
            });
        }
        if instance.port == 0 {
            errors.push(ValidationError::InvalidPort { index });
        }
        if seen.insert(instance.service_id.as_str(), index).is_some() {
            errors.push(ValidationError::DuplicateServiceId {
                service_id: instance.service_id.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(errors: &mut Vec<ValidationError>, prefix: &str, breaker: &CircuitBreakerConfig) {
    if !(breaker.failure_ratio > 0.0 && breaker.failure_ratio <= 1.0) {
        errors.push(ValidationError::RatioOutOfRange {
            field: format!("{}.failure_ratio", prefix),
            value: breaker.failure_ratio,
        });
    }
    positive(errors, &format!("{}.sampling_duration_ms", prefix), breaker.sampling_duration_ms);
    positive(errors, &format!("{}.minimum_throughput", prefix), u64::from(breaker.minimum_throughput));
    positive(errors, &format!("{}.break_duration_ms", prefix), breaker.break_duration_ms);
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::NotPositive {
            field: field.to_string(),
        });
    }
}

fn socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::InstanceConfig;

    fn instance(id: &str) -> InstanceConfig {
        InstanceConfig {
            service_name: "orders".into(),
            service_id: id.into(),
            address: "127.0.0.1".into(),
            port: 8080,
            status: Default::default(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&MeshConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = MeshConfig::default();
        config.health_monitor.probe_interval_ms = 0;
        config.circuit_breaker.failure_ratio = 1.5;
        config.admin.bind_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::NotPositive {
            field: "health_monitor.probe_interval_ms".into()
        }));
    }

    #[test]
    fn test_duplicate_service_ids_rejected() {
        let mut config = MeshConfig::default();
        config.registry.instances = vec![instance("o1"), instance("o2"), instance("o1")];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateServiceId {
                service_id: "o1".into()
            }]
        );
    }
}
