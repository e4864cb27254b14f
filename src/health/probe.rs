//! Single-instance probes.
//!
//! An instance advertising `health_check_endpoint` gets an HTTP GET, one
//! advertising a usable `tcp_port` gets a TCP connect, anything else has
//! nothing to probe.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;
use url::Url;

use crate::config::HealthMonitorConfig;
use crate::health::cache::ProbeType;
use crate::registry::{metadata, HealthStatus, ServiceInstance};

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub probe_type: Option<ProbeType>,
    pub message: Option<String>,
}

impl ProbeOutcome {
    fn new(status: HealthStatus, probe_type: ProbeType, message: impl Into<String>) -> Self {
        Self {
            status,
            probe_type: Some(probe_type),
            message: Some(message.into()),
        }
    }

    /// Nothing to probe.
    pub fn unprobed() -> Self {
        Self {
            status: HealthStatus::Unknown,
            probe_type: None,
            message: Some("No health check configured".to_string()),
        }
    }
}

/// A probe that did not come back healthy.
///
/// Every variant counts as a failure for the instance's breaker.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The target answered, and the answer was bad.
    #[error("{}", .0.message.as_deref().unwrap_or("probe failed"))]
    Unhealthy(ProbeOutcome),

    #[error("HTTP probe to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid probe target '{0}'")]
    InvalidTarget(String),

    #[error("probe panicked")]
    Panicked,
}

/// Probe transport shared by every instance.
#[derive(Debug, Clone)]
pub struct Probes {
    client: reqwest::Client,
    http_timeout: Duration,
    tcp_timeout: Duration,
    headers: Vec<(String, String)>,
}

impl Probes {
    pub fn new(config: &HealthMonitorConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent("mesh-control-plane-health-check")
            .no_proxy()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            http_timeout: config.http_timeout(),
            tcp_timeout: config.tcp_timeout(),
            headers: parse_headers(&config.http_headers),
        })
    }

    pub async fn probe(&self, instance: &ServiceInstance) -> Result<ProbeOutcome, ProbeError> {
        if let Some(endpoint) = instance
            .meta(metadata::HEALTH_CHECK_ENDPOINT)
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            return self.probe_http(instance, endpoint).await;
        }

        match tcp_port(instance) {
            Some(port) => self.probe_tcp(instance, port).await,
            None => Ok(ProbeOutcome::unprobed()),
        }
    }

    async fn probe_http(
        &self,
        instance: &ServiceInstance,
        endpoint: &str,
    ) -> Result<ProbeOutcome, ProbeError> {
        let url = health_url(instance, endpoint)?;

        let mut request = self.client.get(url.clone()).timeout(self.http_timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|source| ProbeError::Http {
            url: url.to_string(),
            source,
        })?;

        let code = response.status();
        let message = format!("HTTP {}", code.as_u16());
        if code.is_success() {
            Ok(ProbeOutcome::new(HealthStatus::Healthy, ProbeType::Http, message))
        } else {
            Err(ProbeError::Unhealthy(ProbeOutcome::new(
                HealthStatus::Unhealthy,
                ProbeType::Http,
                message,
            )))
        }
    }

    async fn probe_tcp(&self, instance: &ServiceInstance, port: u16) -> Result<ProbeOutcome, ProbeError> {
        let connect = TcpStream::connect((instance.address.as_str(), port));

        let message = match time::timeout(self.tcp_timeout, connect).await {
            Ok(Ok(_stream)) => {
                return Ok(ProbeOutcome::new(
                    HealthStatus::Healthy,
                    ProbeType::Tcp,
                    "TCP connection successful",
                ))
            }
            Ok(Err(e)) => format!("TCP connection failed: {}", e),
            Err(_) => format!("TCP connection timed out after {:?}", self.tcp_timeout),
        };

        Err(ProbeError::Unhealthy(ProbeOutcome::new(
            HealthStatus::Unhealthy,
            ProbeType::Tcp,
            message,
        )))
    }
}

fn health_url(instance: &ServiceInstance, endpoint: &str) -> Result<Url, ProbeError> {
    let raw = if endpoint.starts_with('/') {
        format!("{}{}", instance.base_address(), endpoint)
    } else {
        format!("{}/{}", instance.base_address(), endpoint)
    };
    Url::parse(&raw).map_err(|e| ProbeError::InvalidTarget(format!("{}: {}", raw, e)))
}

fn tcp_port(instance: &ServiceInstance) -> Option<u16> {
    instance
        .meta(metadata::TCP_PORT)
        .and_then(|p| p.trim().parse::<u16>().ok())
        .filter(|p| *p != 0)
}

/// Parse `name=value` header entries. Malformed entries are skipped.
pub fn parse_headers(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Some((name.trim().to_string(), value.trim().to_string()))
            }
            _ => {
                tracing::warn!(entry = %entry, "Ignoring malformed health check header");
                None
            }
        })
        .collect()
}
