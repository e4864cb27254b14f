//! Uniform random selection.

use crate::load_balancer::{LoadBalancingContext, SelectionStrategy};
use crate::registry::ServiceInstance;

#[derive(Debug, Default)]
pub struct RandomSelection;

impl SelectionStrategy for RandomSelection {
    fn select<'a>(
        &self,
        _service_name: &str,
        candidates: &'a [ServiceInstance],
        _context: &LoadBalancingContext,
    ) -> Option<&'a ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }
        candidates.get(fastrand::usize(..candidates.len()))
    }
}
