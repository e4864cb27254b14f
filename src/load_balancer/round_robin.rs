//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::load_balancer::{LoadBalancingContext, SelectionStrategy};
use crate::registry::ServiceInstance;

/// Round-robin selector.
/// Keeps one rotating counter per key (normally the service name).
#[derive(Debug, Default)]
pub struct RoundRobin {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index in `0..len` for `key`. `len` must be non-zero.
    pub fn next_index(&self, key: &str, len: usize) -> usize {
        if let Some(counter) = self.counters.get(key) {
            return counter.fetch_add(1, Ordering::Relaxed) % len;
        }
        let counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl SelectionStrategy for RoundRobin {
    fn select<'a>(
        &self,
        service_name: &str,
        candidates: &'a [ServiceInstance],
        _context: &LoadBalancingContext,
    ) -> Option<&'a ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }
        candidates.get(self.next_index(service_name, candidates.len()))
    }
}
