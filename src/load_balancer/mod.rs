//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! select_instance(service, context)
//!     → registry (all instances of the service)
//!     → candidate filter: Healthy, else anything not Unknown
//!     → strategy named by the first `lb_strategy` metadata value:
//!         - round_robin.rs (per-service rotating counter)
//!         - least_conn.rs (fewest open selections)
//!         - weighted.rs (round robin over a weight-expanded list)
//!         - ip_hash.rs (session / correlation id affinity)
//!         - random.rs
//!     → stats.rs (per-instance counters) + selection metric
//! ```
//!
//! # Design Decisions
//! - Strategies are independent objects in a lookup table; the dispatcher never matches on them
//! - Counters are atomics in sharded maps; no lock spans the selection path
//! - Selection is best effort under races (two callers may pick the same least-loaded instance)

pub mod balancer;
pub mod ip_hash;
pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod stats;
pub mod weighted;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ServiceInstance;

pub use balancer::LoadBalancer;
pub use ip_hash::IpHash;
pub use least_conn::LeastConnections;
pub use random::RandomSelection;
pub use round_robin::RoundRobin;
pub use stats::{LoadBalancingStats, StatsRecorder};
pub use weighted::WeightedRoundRobin;

/// Picks one instance out of a non-empty candidate list.
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    fn select<'a>(
        &self,
        service_name: &str,
        candidates: &'a [ServiceInstance],
        context: &LoadBalancingContext,
    ) -> Option<&'a ServiceInstance>;

    /// A request that went to `service_id` has completed.
    fn release(&self, _service_id: &str) {}
}

/// Names accepted in the `lb_strategy` metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    #[serde(rename = "IPHash")]
    IpHash,
    Random,
}

impl LoadBalancingStrategy {
    pub const ALL: [LoadBalancingStrategy; 5] = [
        LoadBalancingStrategy::RoundRobin,
        LoadBalancingStrategy::LeastConnections,
        LoadBalancingStrategy::WeightedRoundRobin,
        LoadBalancingStrategy::IpHash,
        LoadBalancingStrategy::Random,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingStrategy::RoundRobin => "RoundRobin",
            LoadBalancingStrategy::LeastConnections => "LeastConnections",
            LoadBalancingStrategy::WeightedRoundRobin => "WeightedRoundRobin",
            LoadBalancingStrategy::IpHash => "IPHash",
            LoadBalancingStrategy::Random => "Random",
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown load balancing strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for LoadBalancingStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        LoadBalancingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Per-request hints from the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancingContext {
    pub preferred_zone: Option<String>,
    pub headers: HashMap<String, String>,
    pub session_id: Option<String>,
}

impl LoadBalancingContext {
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outcome of a request that was routed to a selected instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    pub service_id: String,
    pub success: bool,
    #[serde(rename = "response_time_ms", with = "millis")]
    pub response_time: Duration,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RequestResult {
    pub fn success(service_id: impl Into<String>, response_time: Duration) -> Self {
        Self {
            service_id: service_id.into(),
            success: true,
            response_time,
            status_code: None,
            error_message: None,
        }
    }

    pub fn failure(service_id: impl Into<String>, response_time: Duration, error: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            success: false,
            response_time,
            status_code: None,
            error_message: Some(error.into()),
        }
    }
}

/// `Duration` as fractional milliseconds on the wire.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_nanos() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        let nanos = (ms * 1_000_000.0).round();
        if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
            return Err(de::Error::custom(format!("invalid duration of {} ms", ms)));
        }
        Ok(Duration::from_nanos(nanos as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parses_case_insensitively() {
        assert_eq!("roundrobin".parse(), Ok(LoadBalancingStrategy::RoundRobin));
        assert_eq!(
            " WEIGHTEDROUNDROBIN ".parse(),
            Ok(LoadBalancingStrategy::WeightedRoundRobin)
        );
        assert_eq!("iphash".parse(), Ok(LoadBalancingStrategy::IpHash));
        assert!("fastest".parse::<LoadBalancingStrategy>().is_err());
    }

    #[test]
    fn test_context_header_lookup_ignores_case() {
        let ctx = LoadBalancingContext::default().with_header("X-Correlation-ID", "abc");
        assert_eq!(ctx.header("x-correlation-id"), Some("abc"));
        assert_eq!(ctx.header("method"), None);
    }

    #[test]
    fn test_request_result_wire_format() {
        let parsed: RequestResult = serde_json::from_str(
            r#"{"service_id":"o1","success":false,"response_time_ms":12.5,"status_code":502}"#,
        )
        .unwrap();
        assert_eq!(parsed.response_time, Duration::from_micros(12_500));
        assert_eq!(parsed.status_code, Some(502));
        assert!(parsed.error_message.is_none());

        let negative = serde_json::from_str::<RequestResult>(
            r#"{"service_id":"o1","success":true,"response_time_ms":-1}"#,
        );
        assert!(negative.is_err());
    }
}
