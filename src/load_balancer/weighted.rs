//! Weighted round robin: each instance owns `weight` consecutive slots in the rotation.
//!
//! The rotation is never materialised; a slot index is mapped back to its
//! owner by walking cumulative weights.

use std::sync::Arc;

use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{LoadBalancingContext, SelectionStrategy};
use crate::registry::{metadata, ServiceInstance};

#[derive(Debug)]
pub struct WeightedRoundRobin {
    counters: Arc<RoundRobin>,
}

impl WeightedRoundRobin {
    /// Shares rotation counters with `counters`, under the key `{service}-weighted`.
    pub fn new(counters: Arc<RoundRobin>) -> Self {
        Self { counters }
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new(Arc::new(RoundRobin::new()))
    }
}

/// Positive integer from the `weight` key, 1 otherwise.
pub fn weight_of(instance: &ServiceInstance) -> usize {
    instance
        .meta(metadata::WEIGHT)
        .and_then(|w| w.trim().parse::<usize>().ok())
        .filter(|w| *w > 0)
        .unwrap_or(1)
}

impl SelectionStrategy for WeightedRoundRobin {
    fn select<'a>(
        &self,
        service_name: &str,
        candidates: &'a [ServiceInstance],
        _context: &LoadBalancingContext,
    ) -> Option<&'a ServiceInstance> {
        let total = candidates
            .iter()
            .fold(0usize, |sum, instance| sum.saturating_add(weight_of(instance)));
        if total == 0 {
            return None;
        }

        let key = format!("{}-weighted", service_name);
        let slot = self.counters.next_index(&key, total);
        owner_of_slot(candidates, slot)
    }
}

fn owner_of_slot(candidates: &[ServiceInstance], slot: usize) -> Option<&ServiceInstance> {
    let mut upper = 0usize;
    for instance in candidates {
        upper = upper.saturating_add(weight_of(instance));
        if slot < upper {
            return Some(instance);
        }
    }
    // slot < total, so the loop always returns.
    candidates.last()
}
