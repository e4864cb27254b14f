//! Instance selection for a logical service.

use std::collections::HashMap;
use std::sync::Arc;

use crate::load_balancer::{
    IpHash, LeastConnections, LoadBalancingContext, LoadBalancingStats, LoadBalancingStrategy,
    RandomSelection, RequestResult, RoundRobin, SelectionStrategy, StatsRecorder,
    WeightedRoundRobin,
};
use crate::observability::metrics;
use crate::registry::{metadata, HealthStatus, RegistryResult, ServiceInstance, ServiceRegistry};

const METHOD_HEADER: &str = "method";
const DEFAULT_METHOD: &str = "proxy";

pub struct LoadBalancer {
    registry: Arc<dyn ServiceRegistry>,
    strategies: HashMap<LoadBalancingStrategy, Arc<dyn SelectionStrategy>>,
    stats: StatsRecorder,
}

impl LoadBalancer {
    /// A balancer with every built-in strategy registered.
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        let round_robin = Arc::new(RoundRobin::new());
        let mut strategies: HashMap<LoadBalancingStrategy, Arc<dyn SelectionStrategy>> = HashMap::new();
        strategies.insert(LoadBalancingStrategy::RoundRobin, round_robin.clone());
        strategies.insert(
            LoadBalancingStrategy::WeightedRoundRobin,
            Arc::new(WeightedRoundRobin::new(round_robin)),
        );
        strategies.insert(LoadBalancingStrategy::LeastConnections, Arc::new(LeastConnections::new()));
        strategies.insert(LoadBalancingStrategy::IpHash, Arc::new(IpHash::new()));
        strategies.insert(LoadBalancingStrategy::Random, Arc::new(RandomSelection));

        Self {
            registry,
            strategies,
            stats: StatsRecorder::new(),
        }
    }

    /// Replace the implementation behind `kind`.
    pub fn with_strategy(mut self, kind: LoadBalancingStrategy, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategies.insert(kind, strategy);
        self
    }

    /// Pick an instance of `service_name`.
    ///
    /// `Ok(None)` means there is no viable instance; only registry failures are errors.
    pub async fn select_instance(
        &self,
        service_name: &str,
        context: &LoadBalancingContext,
    ) -> RegistryResult<Option<ServiceInstance>> {
        let instances = self.registry.get_service_instances(service_name).await?;
        let candidates = candidates(instances);
        if candidates.is_empty() {
            tracing::debug!(service = %service_name, "No viable instances for selection");
            metrics::record_no_candidates(service_name);
            return Ok(None);
        }

        let kind = resolve_strategy(&candidates);
        let strategy = self
            .strategies
            .get(&kind)
            .or_else(|| self.strategies.get(&LoadBalancingStrategy::RoundRobin));
        let Some(selected) = strategy.and_then(|s| s.select(service_name, &candidates, context)) else {
            tracing::warn!(service = %service_name, strategy = %kind, "Strategy returned no instance");
            metrics::record_no_candidates(service_name);
            return Ok(None);
        };
        let selected = selected.clone();

        let method = context.header(METHOD_HEADER).unwrap_or(DEFAULT_METHOD);
        metrics::record_selection(service_name, method);
        self.stats.record_selection(service_name, &selected.service_id);

        tracing::trace!(
            service = %service_name,
            instance = %selected.service_id,
            strategy = %kind,
            "Instance selected"
        );
        Ok(Some(selected))
    }

    /// Release the instance's open selection and fold the result into its stats.
    pub fn report_result(&self, result: &RequestResult) {
        for strategy in self.strategies.values() {
            strategy.release(&result.service_id);
        }
        if !self.stats.report(result) {
            tracing::debug!(instance = %result.service_id, "Result reported for an instance never selected");
        }
    }

    pub fn get_stats(&self, service_name: &str) -> LoadBalancingStats {
        self.stats.snapshot(service_name)
    }
}

/// Healthy instances, else anything whose health is known.
fn candidates(instances: Vec<ServiceInstance>) -> Vec<ServiceInstance> {
    let (healthy, rest): (Vec<_>, Vec<_>) = instances
        .into_iter()
        .partition(|i| i.status == HealthStatus::Healthy);
    if !healthy.is_empty() {
        return healthy;
    }
    rest.into_iter()
        .filter(|i| i.status != HealthStatus::Unknown)
        .collect()
}

/// First non-blank `lb_strategy` among the candidates; RoundRobin if absent or unparseable.
fn resolve_strategy(candidates: &[ServiceInstance]) -> LoadBalancingStrategy {
    let Some(raw) = candidates
        .iter()
        .filter_map(|i| i.meta(metadata::LB_STRATEGY))
        .find(|v| !v.trim().is_empty())
    else {
        return LoadBalancingStrategy::default();
    };

    raw.parse().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Falling back to round robin");
        LoadBalancingStrategy::default()
    })
}
