//! Background rebuild of the routing table from the registry's healthy instances.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::RoutingConfig;
use crate::observability::metrics;
use crate::registry::{HealthStatus, RegistryResult, ServiceRegistry};
use crate::routing::table::{
    ActiveHealthCheckPolicy, ClusterEntry, RouteEntry, RoutingSnapshot, RoutingTable,
};

pub struct RoutingTableGenerator {
    registry: Arc<dyn ServiceRegistry>,
    table: Arc<RoutingTable>,
    config: RoutingConfig,
}

impl RoutingTableGenerator {
    pub fn new(registry: Arc<dyn ServiceRegistry>, table: Arc<RoutingTable>, config: RoutingConfig) -> Self {
        Self {
            registry,
            table,
            config,
        }
    }

    /// Rebuild immediately, then every refresh interval (retry interval after a failure).
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Routing table generation disabled");
            return;
        }

        tracing::info!(
            refresh_ms = self.config.refresh_interval_ms,
            retry_ms = self.config.retry_interval_ms,
            "Routing table generator starting"
        );

        loop {
            let delay: Duration = tokio::select! {
                result = self.refresh() => match result {
                    Ok(snapshot) => {
                        tracing::info!(
                            version = snapshot.version,
                            routes = snapshot.routes.len(),
                            clusters = snapshot.clusters.len(),
                            "Routing table published"
                        );
                        self.config.refresh_interval()
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            retry_ms = self.config.retry_interval_ms,
                            "Routing table rebuild failed, keeping previous snapshot"
                        );
                        metrics::record_routing_failure();
                        self.config.retry_interval()
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Routing table generator shutting down mid-cycle");
                    break;
                }
            };

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Routing table generator received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Build and publish one snapshot.
    pub async fn refresh(&self) -> RegistryResult<Arc<RoutingSnapshot>> {
        let (routes, clusters) = self.build().await?;
        metrics::record_routing_table(routes.len(), clusters.len());
        Ok(self.table.publish(routes, clusters))
    }

    /// One route and one cluster per non-reserved service with healthy instances.
    ///
    /// Any registry error fails the whole build so a partial table is never published.
    pub async fn build(&self) -> RegistryResult<(Vec<RouteEntry>, Vec<ClusterEntry>)> {
        let services = self.registry.get_all_services().await?;
        let health_check = ActiveHealthCheckPolicy::from(&self.config.health_check);

        let mut routes = Vec::new();
        let mut clusters = Vec::new();

        for service in services {
            if self.is_reserved(&service) {
                tracing::trace!(service = %service, "Skipping reserved service");
                continue;
            }

            let instances = self.registry.get_service_instances(&service).await?;
            let destinations: BTreeMap<String, String> = instances
                .iter()
                .filter(|i| i.status == HealthStatus::Healthy)
                .map(|i| (i.service_id.clone(), i.base_address()))
                .collect();

            if destinations.is_empty() {
                tracing::warn!(
                    service = %service,
                    instances = instances.len(),
                    "No healthy instances, omitting service from routing table"
                );
                continue;
            }

            let cluster_id = format!("{}-cluster", service);
            routes.push(RouteEntry {
                route_id: format!("{}-route", service),
                cluster_id: cluster_id.clone(),
                path_match: format!("{}{}/**", self.config.route_prefix, service),
            });
            clusters.push(ClusterEntry {
                cluster_id,
                destinations,
                load_balancing_policy: self.config.load_balancing_policy.clone(),
                health_check: health_check.clone(),
            });
        }

        Ok((routes, clusters))
    }

    fn is_reserved(&self, service: &str) -> bool {
        let lowered = service.to_ascii_lowercase();
        self.config
            .reserved_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && lowered.starts_with(&prefix.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::FailingRegistry;
    use crate::registry::{metadata, InMemoryRegistry, ServiceInstance};

    fn healthy(service: &str, id: &str, port: u16) -> ServiceInstance {
        ServiceInstance::new(service, id, "10.0.0.1", port).with_status(HealthStatus::Healthy)
    }

    fn generator(registry: InMemoryRegistry) -> RoutingTableGenerator {
        RoutingTableGenerator::new(
            Arc::new(registry),
            Arc::new(RoutingTable::new()),
            RoutingConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_cluster_per_service_with_healthy_destinations() {
        let registry = InMemoryRegistry::new();
        registry.register(healthy("orders", "o2", 8081)).unwrap();
        registry
            .register(healthy("orders", "o1", 8443).with_metadata(metadata::SCHEME, "https"))
            .unwrap();
        registry
            .register(ServiceInstance::new("orders", "o3", "10.0.0.1", 8082).with_status(HealthStatus::Unhealthy))
            .unwrap();

        let (routes, clusters) = generator(registry).build().await.unwrap();

        assert_eq!(
            routes,
            vec![RouteEntry {
                route_id: "orders-route".into(),
                cluster_id: "orders-cluster".into(),
                path_match: "/api/orders/**".into(),
            }]
        );
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        let ids: Vec<_> = cluster.destinations.keys().cloned().collect();
        assert_eq!(ids, vec!["o1", "o2"]);
        assert_eq!(cluster.destinations["o1"], "https://10.0.0.1:8443");
        assert_eq!(cluster.destinations["o2"], "http://10.0.0.1:8081");
        assert_eq!(cluster.load_balancing_policy, "RoundRobin");
        assert_eq!(cluster.health_check.path, "/health");
        assert_eq!(cluster.health_check.interval(), Duration::from_secs(10));
        assert_eq!(cluster.health_check.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_service_without_healthy_instances_omitted() {
        let registry = InMemoryRegistry::new();
        registry.register(healthy("orders", "o1", 8080)).unwrap();
        registry
            .register(ServiceInstance::new("billing", "b1", "10.0.0.2", 8080).with_status(HealthStatus::Degraded))
            .unwrap();

        let (routes, clusters) = generator(registry).build().await.unwrap();
        assert_eq!(routes.len(), 1);
        assert!(clusters.iter().all(|c| c.cluster_id != "billing-cluster"));
    }

    #[tokio::test]
    async fn test_reserved_services_skipped() {
        let registry = InMemoryRegistry::new();
        registry.register(healthy("Consul", "c1", 8500)).unwrap();
        registry.register(healthy("consul-agent", "c2", 8501)).unwrap();
        registry.register(healthy("orders", "o1", 8080)).unwrap();

        let (routes, _) = generator(registry).build().await.unwrap();
        let ids: Vec<_> = routes.iter().map(|r| r.route_id.as_str()).collect();
        assert_eq!(ids, vec!["orders-route"]);
    }

    #[tokio::test]
    async fn test_refresh_publishes_new_version() {
        let registry = InMemoryRegistry::new();
        registry.register(healthy("orders", "o1", 8080)).unwrap();
        let generator = generator(registry.clone());

        let first = generator.refresh().await.unwrap();
        assert_eq!(first.version, 1);

        registry.deregister("o1");
        let second = generator.refresh().await.unwrap();
        assert_eq!(second.version, 2);
        assert!(second.routes.is_empty());
        assert_eq!(generator.table.snapshot().version, 2);
    }

    #[tokio::test]
    async fn test_run_publishes_immediately_and_stops() {
        let registry = InMemoryRegistry::new();
        registry.register(healthy("orders", "o1", 8080)).unwrap();
        let table = Arc::new(RoutingTable::new());
        let generator = RoutingTableGenerator::new(Arc::new(registry), table.clone(), RoutingConfig::default());
        let mut changes = table.subscribe();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(generator.run(rx));
        time::timeout(Duration::from_secs(2), changes.changed())
            .await
            .expect("no snapshot published")
            .unwrap();
        assert_eq!(table.snapshot().routes.len(), 1);

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("generator did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_registry_error_keeps_previous_snapshot() {
        let inner = InMemoryRegistry::new();
        inner.register(healthy("orders", "o1", 8080)).unwrap();
        inner.register(healthy("billing", "b1", 8081)).unwrap();
        let registry = Arc::new(FailingRegistry::new(inner));
        let table = Arc::new(RoutingTable::new());
        let generator = RoutingTableGenerator::new(registry.clone(), table.clone(), RoutingConfig::default());

        generator.refresh().await.unwrap();
        assert_eq!(table.snapshot().version, 1);

        registry.fail_listing();
        assert!(generator.refresh().await.is_err());

        // A single failed lookup also fails the rebuild, no partial table.
        registry.heal();
        registry.fail_lookup("orders");
        assert!(generator.refresh().await.is_err());

        let current = table.snapshot();
        assert_eq!(current.version, 1);
        assert_eq!(current.routes.len(), 2);
    }

    #[tokio::test]
    async fn test_run_retries_on_retry_interval() {
        let inner = InMemoryRegistry::new();
        inner.register(healthy("orders", "o1", 8080)).unwrap();
        let registry = Arc::new(FailingRegistry::new(inner));
        registry.fail_listing();

        let table = Arc::new(RoutingTable::new());
        let config = RoutingConfig {
            refresh_interval_ms: 60_000,
            retry_interval_ms: 50,
            ..RoutingConfig::default()
        };
        let generator = RoutingTableGenerator::new(registry.clone(), table.clone(), config);
        let mut changes = table.subscribe();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(generator.run(rx));
        time::sleep(Duration::from_millis(120)).await;
        assert_eq!(table.snapshot().version, 0);

        registry.heal();
        // Well inside the refresh interval, so only the retry path can publish.
        time::timeout(Duration::from_secs(2), changes.changed())
            .await
            .expect("no snapshot published after recovery")
            .unwrap();
        assert_eq!(table.snapshot().version, 1);
        assert_eq!(table.snapshot().routes.len(), 1);

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("generator did not stop")
            .unwrap();
    }
}
