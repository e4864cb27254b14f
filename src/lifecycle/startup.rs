//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared subsystems in dependency order
//! - Spawn the health prober, routing generator and admin API
//! - Join everything on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The admin listener binds last, once every handle it serves exists

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{self, AdminState};
use crate::config::MeshConfig;
use crate::health::{HealthCache, HealthProber};
use crate::lifecycle::Shutdown;
use crate::load_balancer::LoadBalancer;
use crate::registry::ServiceRegistry;
use crate::resilience::{CircuitBreakerFactory, CircuitBreakerOptions};
use crate::routing::{RoutingTable, RoutingTableGenerator};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build probe HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to bind admin API on {addr}: {source}")]
    AdminBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A running control plane: shared state plus its background tasks.
pub struct ControlPlane {
    registry: Arc<dyn ServiceRegistry>,
    health: Arc<HealthCache>,
    breakers: Arc<CircuitBreakerFactory>,
    load_balancer: Arc<LoadBalancer>,
    routing: Arc<RoutingTable>,
    admin_addr: Option<SocketAddr>,
    shutdown: Shutdown,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ControlPlane {
    pub async fn start(config: MeshConfig, registry: Arc<dyn ServiceRegistry>) -> Result<Self, StartupError> {
        let shutdown = Shutdown::new();
        let health = Arc::new(HealthCache::new());
        let breakers = Arc::new(CircuitBreakerFactory::new(CircuitBreakerOptions::from(
            &config.circuit_breaker,
        )));
        let load_balancer = Arc::new(LoadBalancer::new(registry.clone()));
        let routing = Arc::new(RoutingTable::new());
        let mut tasks = Vec::new();

        let prober = HealthProber::new(
            registry.clone(),
            health.clone(),
            breakers.clone(),
            config.health_monitor.clone(),
        )?;
        tasks.push(("health-prober", tokio::spawn(prober.run(shutdown.subscribe()))));

        let generator = RoutingTableGenerator::new(registry.clone(), routing.clone(), config.routing.clone());
        tasks.push(("routing-generator", tokio::spawn(generator.run(shutdown.subscribe()))));

        let mut admin_addr = None;
        if config.admin.enabled {
            let listener = TcpListener::bind(&config.admin.bind_address)
                .await
                .map_err(|source| StartupError::AdminBind {
                    addr: config.admin.bind_address.clone(),
                    source,
                })?;
            admin_addr = listener.local_addr().ok();

            let state = AdminState {
                registry: registry.clone(),
                health: health.clone(),
                breakers: breakers.clone(),
                load_balancer: load_balancer.clone(),
                routing: routing.clone(),
                api_key: Arc::from(config.admin.api_key.as_str()),
                started_at: SystemTime::now(),
            };
            let router = admin::setup_admin_router(state, Duration::from_secs(config.admin.request_timeout_secs));
            let rx = shutdown.subscribe();
            tasks.push((
                "admin-api",
                tokio::spawn(async move {
                    if let Err(e) = admin::serve(listener, router, rx).await {
                        tracing::error!(error = %e, "Admin API failed");
                    }
                }),
            ));
        }

        tracing::info!(
            prober = config.health_monitor.enabled,
            routing = config.routing.enabled,
            admin = ?admin_addr,
            "Control plane started"
        );

        Ok(Self {
            registry,
            health,
            breakers,
            load_balancer,
            routing,
            admin_addr,
            shutdown,
            tasks,
        })
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerFactory> {
        &self.breakers
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    /// Bound admin address, if the admin API is enabled.
    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Signal every loop to stop and wait for them, abandoning any that overrun.
    pub async fn shutdown(self) {
        self.shutdown.trigger();

        for (name, handle) in self.tasks {
            let abort = handle.abort_handle();
            match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Task stopped"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = name, "Task did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        tracing::info!("Control plane stopped");
    }
}
