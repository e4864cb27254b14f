//! Last-known health of every probed instance.
//!
//! Keyed by `service_id`. Each entry carries its own lock so concurrent
//! probes of different instances never contend beyond the map shard.
//! Readers always get copies.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::registry::{HealthStatus, ServiceInstance};

/// How a health result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeType {
    Http,
    Tcp,
    /// Probe skipped because the instance's breaker is open.
    CircuitBreaker,
    /// Probe failed with an error other than a clean negative answer.
    Exception,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Http => "http",
            ProbeType::Tcp => "tcp",
            ProbeType::CircuitBreaker => "circuit-breaker",
            ProbeType::Exception => "exception",
        }
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache entry for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoredInstance {
    pub service_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub status: HealthStatus,
    pub last_probe: SystemTime,
    /// `None` when the instance exposes nothing to probe.
    pub last_probe_type: Option<ProbeType>,
    pub message: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl MonitoredInstance {
    fn new(instance: &ServiceInstance) -> Self {
        Self {
            service_id: instance.service_id.clone(),
            service_name: instance.service_name.clone(),
            address: instance.address.clone(),
            port: instance.port,
            status: HealthStatus::Unknown,
            last_probe: SystemTime::now(),
            last_probe_type: None,
            message: None,
            metadata: instance.metadata.clone(),
        }
    }

    fn apply(
        &mut self,
        instance: &ServiceInstance,
        status: HealthStatus,
        probe_type: Option<ProbeType>,
        message: Option<String>,
    ) {
        self.address.clone_from(&instance.address);
        self.port = instance.port;
        self.metadata.clone_from(&instance.metadata);
        self.status = status;
        self.last_probe = SystemTime::now();
        self.last_probe_type = probe_type;
        self.message = message;
    }
}

type Entry = Arc<RwLock<MonitoredInstance>>;

/// Concurrent map of `service_id` → last-known health.
#[derive(Debug, Default)]
pub struct HealthCache {
    entries: DashMap<String, Entry>,
}

impl HealthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry on first sight, then mutate it in place.
    pub fn update(
        &self,
        instance: &ServiceInstance,
        status: HealthStatus,
        probe_type: Option<ProbeType>,
        message: Option<String>,
    ) {
        let entry: Entry = self
            .entries
            .entry(instance.service_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(MonitoredInstance::new(instance))))
            .clone();

        let mut monitored = entry.write().unwrap_or_else(PoisonError::into_inner);
        monitored.apply(instance, status, probe_type, message);
    }

    /// Copy of one entry.
    pub fn get(&self, service_id: &str) -> Option<MonitoredInstance> {
        let entry = self.entries.get(service_id)?.value().clone();
        let snapshot = entry.read().unwrap_or_else(PoisonError::into_inner).clone();
        Some(snapshot)
    }

    /// Copies of every entry, ordered by service then id.
    pub fn get_all(&self) -> Vec<MonitoredInstance> {
        self.collect(|_| true)
    }

    /// Copies of the entries for one service (name compared case-insensitively).
    pub fn get_by_service(&self, service_name: &str) -> Vec<MonitoredInstance> {
        self.collect(|m| m.service_name.eq_ignore_ascii_case(service_name))
    }

    /// Drop entries whose id is not in `live`. Returns the number removed.
    pub fn retain_ids(&self, live: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| live.contains(id));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect<F>(&self, keep: F) -> Vec<MonitoredInstance>
    where
        F: Fn(&MonitoredInstance) -> bool,
    {
        // Clone the Arcs first so no shard lock is held while reading entries.
        let entries: Vec<Entry> = self.entries.iter().map(|r| r.value().clone()).collect();

        let mut out: Vec<MonitoredInstance> = entries
            .iter()
            .map(|e| e.read().unwrap_or_else(PoisonError::into_inner).clone())
            .filter(|m| keep(m))
            .collect();
        out.sort_by(|a, b| {
            a.service_name
                .cmp(&b.service_name)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(service: &str, id: &str) -> ServiceInstance {
        ServiceInstance::new(service, id, "10.0.0.1", 8080)
    }

    #[test]
    fn test_update_creates_then_mutates() {
        let cache = HealthCache::new();
        let o1 = instance("orders", "o1");

        cache.update(&o1, HealthStatus::Healthy, Some(ProbeType::Http), Some("HTTP 200".into()));
        let first = cache.get("o1").unwrap();
        assert_eq!(first.status, HealthStatus::Healthy);
        assert_eq!(first.last_probe_type, Some(ProbeType::Http));

        let moved = ServiceInstance::new("orders", "o1", "10.0.0.9", 9090);
        cache.update(&moved, HealthStatus::Unhealthy, Some(ProbeType::Tcp), None);
        let second = cache.get("o1").unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(second.status, HealthStatus::Unhealthy);
        assert_eq!(second.address, "10.0.0.9");
        assert_eq!(second.port, 9090);
        assert!(second.message.is_none());
    }

    #[test]
    fn test_snapshots_are_copies() {
        let cache = HealthCache::new();
        let o1 = instance("orders", "o1");
        cache.update(&o1, HealthStatus::Healthy, Some(ProbeType::Http), None);

        let snapshot = cache.get_all();
        cache.update(&o1, HealthStatus::Unhealthy, Some(ProbeType::Http), None);

        assert_eq!(snapshot[0].status, HealthStatus::Healthy);
        assert_eq!(cache.get("o1").unwrap().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_get_by_service() {
        let cache = HealthCache::new();
        cache.update(&instance("orders", "o2"), HealthStatus::Healthy, None, None);
        cache.update(&instance("orders", "o1"), HealthStatus::Healthy, None, None);
        cache.update(&instance("billing", "b1"), HealthStatus::Healthy, None, None);

        let orders = cache.get_by_service("ORDERS");
        let ids: Vec<_> = orders.iter().map(|m| m.service_id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2"]);
        assert_eq!(cache.get_all().len(), 3);
    }

    #[test]
    fn test_retain_ids_evicts_missing() {
        let cache = HealthCache::new();
        cache.update(&instance("orders", "o1"), HealthStatus::Healthy, None, None);
        cache.update(&instance("orders", "o2"), HealthStatus::Healthy, None, None);

        let live: HashSet<String> = ["o1".to_string()].into_iter().collect();
        assert_eq!(cache.retain_ids(&live), 1);
        assert!(cache.get("o2").is_none());
    }

    #[test]
    fn test_probe_type_serializes_kebab_case() {
        let json = serde_json::to_string(&ProbeType::CircuitBreaker).unwrap();
        assert_eq!(json, "\"circuit-breaker\"");
    }
}
