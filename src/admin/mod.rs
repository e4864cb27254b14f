//! Admin HTTP API.
//!
//! Read-only views of health, routing and load-balancer state, plus
//! `select` / `results` endpoints so callers without an in-process handle
//! can drive the load balancer. Every route requires the bearer API key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::health::HealthCache;
use crate::load_balancer::LoadBalancer;
use crate::registry::ServiceRegistry;
use crate::resilience::CircuitBreakerFactory;
use crate::routing::RoutingTable;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<dyn ServiceRegistry>,
    pub health: Arc<HealthCache>,
    pub breakers: Arc<CircuitBreakerFactory>,
    pub load_balancer: Arc<LoadBalancer>,
    pub routing: Arc<RoutingTable>,
    pub api_key: Arc<str>,
    pub started_at: SystemTime,
}

/// Build the admin router with auth, request-id, trace and timeout layers.
#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health", get(get_health))
        .route("/admin/health/{service}", get(get_service_health))
        .route("/admin/routing", get(get_routing))
        .route("/admin/stats/{service}", get(get_stats))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/select/{service}", post(select_instance))
        .route("/admin/results", post(report_result))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Serve `router` until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
