//! Affinity by session id or correlation header.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::load_balancer::{LoadBalancingContext, SelectionStrategy};
use crate::registry::ServiceInstance;

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Hashes the session id, else the correlation header.
///
/// Without either the key is a fresh random value, so the choice is random per call.
#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    pub fn new() -> Self {
        Self
    }

    fn affinity_key(context: &LoadBalancingContext) -> String {
        context
            .session_id
            .clone()
            .or_else(|| context.header(CORRELATION_HEADER).map(str::to_string))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// Stable for the life of the process.
fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl SelectionStrategy for IpHash {
    fn select<'a>(
        &self,
        _service_name: &str,
        candidates: &'a [ServiceInstance],
        context: &LoadBalancingContext,
    ) -> Option<&'a ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }
        let key = Self::affinity_key(context);
        let index = (hash_key(&key) % candidates.len() as u64) as usize;
        candidates.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<ServiceInstance> {
        (0..4)
            .map(|i| ServiceInstance::new("orders", format!("o{}", i), "10.0.0.1", 8080))
            .collect()
    }

    #[test]
    fn test_same_session_is_sticky() {
        let lb = IpHash::new();
        let backends = backends();
        let ctx = LoadBalancingContext::with_session("session-42");

        let first = lb.select("orders", &backends, &ctx).unwrap().service_id.clone();
        for _ in 0..20 {
            assert_eq!(lb.select("orders", &backends, &ctx).unwrap().service_id, first);
        }
    }

    #[test]
    fn test_correlation_header_used_without_session() {
        let lb = IpHash::new();
        let backends = backends();
        let by_header = LoadBalancingContext::default().with_header("x-correlation-id", "abc");
        let by_session = LoadBalancingContext::with_session("abc");

        assert_eq!(
            lb.select("orders", &backends, &by_header).unwrap().service_id,
            lb.select("orders", &backends, &by_session).unwrap().service_id
        );
    }

    #[test]
    fn test_no_identity_still_selects() {
        let lb = IpHash::new();
        let backends = backends();
        assert!(lb
            .select("orders", &backends, &LoadBalancingContext::default())
            .is_some());
    }
}
