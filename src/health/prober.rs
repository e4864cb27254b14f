//! Periodic health probing of every registered instance.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{stream, FutureExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthMonitorConfig;
use crate::health::cache::{HealthCache, ProbeType};
use crate::health::probe::{ProbeError, ProbeOutcome, Probes};
use crate::observability::metrics;
use crate::registry::{HealthStatus, RegistryError, ServiceInstance, ServiceRegistry};
use crate::resilience::{CircuitBreakerFactory, CircuitBreakerOptions, CircuitError};

/// What one probing cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub services: usize,
    pub probed: usize,
    pub evicted: usize,
    /// False when at least one service's instances could not be listed.
    pub complete: bool,
}

pub struct HealthProber {
    registry: Arc<dyn ServiceRegistry>,
    cache: Arc<HealthCache>,
    breakers: Arc<CircuitBreakerFactory>,
    breaker_options: CircuitBreakerOptions,
    probes: Probes,
    config: HealthMonitorConfig,
}

impl HealthProber {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        cache: Arc<HealthCache>,
        breakers: Arc<CircuitBreakerFactory>,
        config: HealthMonitorConfig,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            probes: Probes::new(&config)?,
            breaker_options: CircuitBreakerOptions::from(&config.breaker),
            registry,
            cache,
            breakers,
            config,
        })
    }

    pub fn cache(&self) -> &Arc<HealthCache> {
        &self.cache
    }

    /// Probe on every tick until shutdown. The first cycle starts immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Health probing disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.probe_interval_ms,
            max_concurrent = self.config.max_concurrent_probes,
            "Health prober starting"
        );

        let mut ticker = time::interval(self.config.probe_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Health prober received shutdown signal, exiting loop");
                    break;
                }
            }

            tokio::select! {
                result = self.run_cycle() => match result {
                    Ok(report) => tracing::debug!(
                        services = report.services,
                        probed = report.probed,
                        evicted = report.evicted,
                        "Health probing cycle complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "Health probing cycle failed"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Health prober shutting down mid-cycle, abandoning in-flight probes");
                    break;
                }
            }
        }
    }

    /// Probe every instance of every service once.
    ///
    /// Fails only when the service list itself cannot be read.
    pub async fn run_cycle(&self) -> Result<CycleReport, RegistryError> {
        let started = Instant::now();
        let services = self.registry.get_all_services().await?;

        let mut instances = Vec::new();
        let mut complete = true;
        for service in &services {
            match self.registry.get_service_instances(service).await {
                Ok(found) => instances.extend(found),
                Err(e) => {
                    complete = false;
                    tracing::warn!(service = %service, error = %e, "Failed to list instances for probing");
                }
            }
        }

        let probed = instances.len();
        let live: HashSet<String> = instances.iter().map(|i| i.service_id.clone()).collect();

        stream::iter(instances)
            .for_each_concurrent(self.config.max_concurrent_probes, |instance| async move {
                self.probe_instance(&instance).await;
            })
            .await;

        let mut evicted = 0;
        if complete && self.config.evict_deregistered {
            evicted = self.cache.retain_ids(&live);
            if evicted > 0 {
                tracing::info!(evicted, "Evicted health entries for deregistered instances");
            }
        }

        metrics::record_probe_cycle(started.elapsed());

        Ok(CycleReport {
            services: services.len(),
            probed,
            evicted,
            complete,
        })
    }

    /// Probe one instance through its breaker, then record and publish the result.
    pub async fn probe_instance(&self, instance: &ServiceInstance) -> HealthStatus {
        let breaker = self
            .breakers
            .get_or_create_with(&instance.service_id, || self.breaker_options.clone());

        let guarded = AssertUnwindSafe(self.probes.probe(instance)).catch_unwind();
        let result = breaker
            .execute(|| async move { guarded.await.unwrap_or(Err(ProbeError::Panicked)) })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(CircuitError::Open(_)) => ProbeOutcome {
                status: HealthStatus::Unhealthy,
                probe_type: Some(ProbeType::CircuitBreaker),
                message: Some("Circuit open due to repeated probe failures".to_string()),
            },
            Err(CircuitError::Failed(ProbeError::Unhealthy(outcome))) => outcome,
            Err(CircuitError::Failed(e)) => {
                tracing::warn!(
                    service = %instance.service_name,
                    instance = %instance.service_id,
                    error = %e,
                    "Health probe raised an error"
                );
                ProbeOutcome {
                    status: HealthStatus::Unhealthy,
                    probe_type: Some(ProbeType::Exception),
                    message: Some(e.to_string()),
                }
            }
        };

        self.record(instance, outcome).await
    }

    async fn record(&self, instance: &ServiceInstance, outcome: ProbeOutcome) -> HealthStatus {
        let status = outcome.status;
        let probe_type = outcome.probe_type;
        let previous = self.cache.get(&instance.service_id).map(|m| m.status);

        self.cache
            .update(instance, status, probe_type, outcome.message.clone());

        if previous != Some(status) {
            tracing::info!(
                service = %instance.service_name,
                instance = %instance.service_id,
                status = %status,
                probe_type = probe_type.map(|p| p.as_str()).unwrap_or("none"),
                message = outcome.message.as_deref().unwrap_or(""),
                "Instance health changed"
            );
        }

        metrics::record_instance_health(
            &instance.service_name,
            &instance.service_id,
            status,
            probe_type.map(|p| p.as_str()).unwrap_or("none"),
        );

        match self
            .registry
            .update_health_status(&instance.service_id, status)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                instance = %instance.service_id,
                "Instance vanished from registry before its health was published"
            ),
            Err(e) => tracing::warn!(
                instance = %instance.service_id,
                error = %e,
                "Failed to publish health status"
            ),
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::net::TcpListener;

    use crate::config::CircuitBreakerConfig;
    use crate::registry::testing::FailingRegistry;
    use crate::registry::{metadata, InMemoryRegistry};

    fn prober(registry: InMemoryRegistry, breaker: CircuitBreakerConfig) -> HealthProber {
        let config = HealthMonitorConfig {
            breaker,
            ..HealthMonitorConfig::default()
        };
        prober_with(Arc::new(registry), Arc::new(HealthCache::new()), config)
    }

    fn prober_with(
        registry: Arc<dyn ServiceRegistry>,
        cache: Arc<HealthCache>,
        config: HealthMonitorConfig,
    ) -> HealthProber {
        HealthProber::new(registry, cache, Arc::new(CircuitBreakerFactory::default()), config).unwrap()
    }

    async fn wait_for_entry(cache: &HealthCache, service_id: &str) -> bool {
        for _ in 0..100 {
            if cache.get(service_id).is_some() {
                return true;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    fn closed_port() -> u16 {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_unprobed_instance_recorded_unknown_and_published() {
        let registry = InMemoryRegistry::new();
        registry
            .register(
                ServiceInstance::new("orders", "o1", "127.0.0.1", 8080)
                    .with_status(HealthStatus::Healthy),
            )
            .unwrap();
        let prober = prober(registry.clone(), CircuitBreakerConfig::default());

        let report = prober.run_cycle().await.unwrap();
        assert_eq!(report.probed, 1);

        let entry = prober.cache().get("o1").unwrap();
        assert_eq!(entry.status, HealthStatus::Unknown);
        assert_eq!(entry.last_probe_type, None);
        assert_eq!(registry.get("o1").unwrap().status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_repeated_failures_open_breaker() {
        let registry = InMemoryRegistry::new();
        let port = closed_port();
        registry
            .register(
                ServiceInstance::new("orders", "o1", "127.0.0.1", 8080)
                    .with_metadata(metadata::TCP_PORT, port.to_string()),
            )
            .unwrap();
        let prober = prober(
            registry,
            CircuitBreakerConfig {
                failure_ratio: 1.0,
                sampling_duration_ms: 60_000,
                minimum_throughput: 2,
                break_duration_ms: 60_000,
            },
        );

        for _ in 0..2 {
            prober.run_cycle().await.unwrap();
            assert_eq!(
                prober.cache().get("o1").unwrap().last_probe_type,
                Some(ProbeType::Tcp)
            );
        }

        prober.run_cycle().await.unwrap();
        let entry = prober.cache().get("o1").unwrap();
        assert_eq!(entry.status, HealthStatus::Unhealthy);
        assert_eq!(entry.last_probe_type, Some(ProbeType::CircuitBreaker));
    }

    #[tokio::test]
    async fn test_deregistered_instances_evicted() {
        let registry = InMemoryRegistry::new();
        registry
            .register(ServiceInstance::new("orders", "o1", "127.0.0.1", 8080))
            .unwrap();
        registry
            .register(ServiceInstance::new("orders", "o2", "127.0.0.1", 8081))
            .unwrap();
        let prober = prober(registry.clone(), CircuitBreakerConfig::default());

        prober.run_cycle().await.unwrap();
        assert_eq!(prober.cache().len(), 2);

        registry.deregister("o2");
        let report = prober.run_cycle().await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(prober.cache().get("o2").is_none());
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let prober = prober(InMemoryRegistry::new(), CircuitBreakerConfig::default());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(prober.run(rx));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("prober did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cycle_fails_when_services_cannot_be_listed() {
        let inner = InMemoryRegistry::new();
        inner.register(ServiceInstance::new("orders", "o1", "127.0.0.1", 8080)).unwrap();
        let registry = Arc::new(FailingRegistry::new(inner));
        registry.fail_listing();

        let cache = Arc::new(HealthCache::new());
        let prober = prober_with(registry, cache.clone(), HealthMonitorConfig::default());

        assert!(prober.run_cycle().await.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_cycle_skips_eviction() {
        let inner = InMemoryRegistry::new();
        inner.register(ServiceInstance::new("orders", "o1", "127.0.0.1", 8080)).unwrap();
        inner.register(ServiceInstance::new("billing", "b1", "127.0.0.1", 8081)).unwrap();
        let registry = Arc::new(FailingRegistry::new(inner.clone()));
        let prober = prober_with(registry.clone(), Arc::new(HealthCache::new()), HealthMonitorConfig::default());

        prober.run_cycle().await.unwrap();
        assert_eq!(prober.cache().len(), 2);

        inner.deregister("b1");
        registry.fail_lookup("orders");
        let report = prober.run_cycle().await.unwrap();
        assert!(!report.complete);
        assert_eq!(report.evicted, 0);
        assert!(prober.cache().get("o1").is_some());
        assert!(prober.cache().get("b1").is_some());

        registry.heal();
        let report = prober.run_cycle().await.unwrap();
        assert!(report.complete);
        assert_eq!(report.evicted, 1);
        assert!(prober.cache().get("b1").is_none());
    }

    #[tokio::test]
    async fn test_run_survives_registry_errors() {
        let inner = InMemoryRegistry::new();
        inner.register(ServiceInstance::new("orders", "o1", "127.0.0.1", 8080)).unwrap();
        let registry = Arc::new(FailingRegistry::new(inner));
        registry.fail_listing();

        let cache = Arc::new(HealthCache::new());
        let config = HealthMonitorConfig {
            probe_interval_ms: 20,
            ..HealthMonitorConfig::default()
        };
        let prober = prober_with(registry.clone(), cache.clone(), config);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(prober.run(rx));

        // Several failed cycles.
        time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        registry.heal();
        assert!(wait_for_entry(&cache, "o1").await, "prober stopped after registry errors");

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("prober did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_hanging_health_check() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let registry = InMemoryRegistry::new();
        registry
            .register(
                ServiceInstance::new("orders", "o1", "127.0.0.1", port)
                    .with_metadata(metadata::HEALTH_CHECK_ENDPOINT, "/health"),
            )
            .unwrap();
        let cache = Arc::new(HealthCache::new());
        let config = HealthMonitorConfig {
            http_timeout_ms: 60_000,
            ..HealthMonitorConfig::default()
        };
        let prober = prober_with(Arc::new(registry), cache.clone(), config);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(prober.run(rx));

        time::sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();

        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("prober did not stop while a check was in flight")
            .unwrap();
        assert!(cache.get("o1").is_none());
    }
}
