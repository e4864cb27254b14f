use std::time::SystemTime;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::health::MonitoredInstance;
use crate::load_balancer::{LoadBalancingContext, LoadBalancingStats, RequestResult};
use crate::registry::{RegistryError, ServiceInstance};
use crate::resilience::BreakerStatus;
use crate::routing::RoutingSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub services: Option<usize>,
    pub monitored_instances: usize,
    pub routing_version: u64,
    pub breakers: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Failures the admin API turns into non-2xx responses.
#[derive(Debug)]
pub enum AdminError {
    NoViableInstance(String),
    Registry(RegistryError),
}

impl From<RegistryError> for AdminError {
    fn from(e: RegistryError) -> Self {
        AdminError::Registry(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AdminError::NoViableInstance(service) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("no viable instance for service '{}'", service),
            ),
            AdminError::Registry(e) => {
                tracing::error!(error = %e, "Registry call failed while serving admin request");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    // Status stays available while the registry is down.
    let services = state.registry.get_all_services().await.ok().map(|s| s.len());
    let uptime_secs = SystemTime::now()
        .duration_since(state.started_at)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs,
        services,
        monitored_instances: state.health.len(),
        routing_version: state.routing.snapshot().version,
        breakers: state.breakers.len(),
    })
}

pub async fn get_health(State(state): State<AdminState>) -> Json<Vec<MonitoredInstance>> {
    Json(state.health.get_all())
}

pub async fn get_service_health(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Json<Vec<MonitoredInstance>> {
    Json(state.health.get_by_service(&service))
}

pub async fn get_routing(State(state): State<AdminState>) -> Json<RoutingSnapshot> {
    Json(state.routing.snapshot().as_ref().clone())
}

pub async fn get_stats(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Json<LoadBalancingStats> {
    Json(state.load_balancer.get_stats(&service))
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerStatus>> {
    Json(state.breakers.snapshot())
}

pub async fn select_instance(
    State(state): State<AdminState>,
    Path(service): Path<String>,
    Json(context): Json<LoadBalancingContext>,
) -> Result<Json<ServiceInstance>, AdminError> {
    let selected = state.load_balancer.select_instance(&service, &context).await?;
    selected.map(Json).ok_or(AdminError::NoViableInstance(service))
}

pub async fn report_result(
    State(state): State<AdminState>,
    Json(result): Json<RequestResult>,
) -> StatusCode {
    state.load_balancer.report_result(&result);
    StatusCode::ACCEPTED
}
