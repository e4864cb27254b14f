//! Least Connections load balancing strategy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::load_balancer::{LoadBalancingContext, SelectionStrategy};
use crate::registry::ServiceInstance;

type Counts = Arc<DashMap<String, AtomicU64>>;

/// Least connections selector.
/// Tracks open selections per service and instance; a completed request releases one.
#[derive(Debug, Default)]
pub struct LeastConnections {
    connections: DashMap<String, Counts>,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open selections recorded for `service_id` under `service_name`.
    pub fn open_connections(&self, service_name: &str, service_id: &str) -> Option<u64> {
        let counts = self.connections.get(service_name)?.value().clone();
        let count = counts.get(service_id)?.load(Ordering::Relaxed);
        Some(count)
    }

    fn counts_for(&self, service_name: &str) -> Counts {
        self.connections
            .entry(service_name.to_string())
            .or_default()
            .value()
            .clone()
    }
}

impl SelectionStrategy for LeastConnections {
    fn select<'a>(
        &self,
        service_name: &str,
        candidates: &'a [ServiceInstance],
        _context: &LoadBalancingContext,
    ) -> Option<&'a ServiceInstance> {
        let counts = self.counts_for(service_name);
        for candidate in candidates {
            counts
                .entry(candidate.service_id.clone())
                .or_insert_with(|| AtomicU64::new(0));
        }

        // Ties go to the first candidate.
        let selected = candidates.iter().min_by_key(|c| {
            counts
                .get(&c.service_id)
                .map(|n| n.load(Ordering::Relaxed))
                .unwrap_or(0)
        })?;

        if let Some(count) = counts.get(&selected.service_id) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        Some(selected)
    }

    /// Service ids are unique mesh-wide, so every service's map is checked.
    fn release(&self, service_id: &str) {
        let maps: Vec<Counts> = self.connections.iter().map(|r| r.value().clone()).collect();
        for counts in maps {
            if let Some(count) = counts.get(service_id) {
                let _ = count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
            }
        }
    }
}
