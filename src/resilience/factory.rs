//! Named breaker registry.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerOptions, CircuitState, StateTransition,
};

const EVENT_CAPACITY: usize = 256;

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
}

/// Creates breakers on first use and returns the same instance afterwards.
///
/// All breakers share one transition channel.
#[derive(Debug)]
pub struct CircuitBreakerFactory {
    defaults: CircuitBreakerOptions,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    events: broadcast::Sender<StateTransition>,
}

impl CircuitBreakerFactory {
    pub fn new(defaults: CircuitBreakerOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            defaults,
            breakers: DashMap::new(),
            events,
        }
    }

    /// Breaker for `name`, created with the default options if missing.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, || self.defaults.clone())
    }

    /// Breaker for `name`, created with `options()` if missing.
    pub fn get_or_create_with<F>(&self, name: &str, options: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> CircuitBreakerOptions,
    {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::with_events(
                    name,
                    options(),
                    Some(self.events.clone()),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|r| r.value().clone())
    }

    /// Receive every state transition from breakers created by this factory.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.events.subscribe()
    }

    /// All breakers and their states, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerStatus> {
        let mut statuses: Vec<BreakerStatus> = self
            .breakers
            .iter()
            .map(|r| BreakerStatus {
                name: r.key().clone(),
                state: r.value().state(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerFactory {
    fn default() -> Self {
        Self::new(CircuitBreakerOptions::default())
    }
}
