//! Published routing snapshot.
//!
//! # Responsibilities
//! - Hold the current (routes, clusters) pair for the proxy layer
//! - Swap in a new snapshot atomically
//! - Signal every swap through a change token
//!
//! # Design Decisions
//! - Readers get an `Arc` to an immutable snapshot; an in-flight read keeps its snapshot alive
//! - The change token carries the snapshot version, so a slow consumer only sees the latest

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::ActiveHealthCheckConfig;

/// Maps a path pattern to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub route_id: String,
    pub cluster_id: String,
    pub path_match: String,
}

/// Health check the proxy runs against cluster destinations on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveHealthCheckPolicy {
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub policy: String,
}

impl ActiveHealthCheckPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl From<&ActiveHealthCheckConfig> for ActiveHealthCheckPolicy {
    fn from(config: &ActiveHealthCheckConfig) -> Self {
        Self {
            path: config.path.clone(),
            interval_secs: config.interval_secs,
            timeout_secs: config.timeout_secs,
            policy: config.policy.clone(),
        }
    }
}

/// Healthy destinations of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterEntry {
    pub cluster_id: String,
    /// instance id → `scheme://address:port`
    pub destinations: BTreeMap<String, String>,
    pub load_balancing_policy: String,
    pub health_check: ActiveHealthCheckPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingSnapshot {
    /// 0 until the first publish, then +1 per publish.
    pub version: u64,
    pub generated_at: SystemTime,
    pub routes: Vec<RouteEntry>,
    pub clusters: Vec<ClusterEntry>,
}

impl RoutingSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            generated_at: SystemTime::now(),
            routes: Vec::new(),
            clusters: Vec::new(),
        }
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterEntry> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    pub fn route(&self, route_id: &str) -> Option<&RouteEntry> {
        self.routes.iter().find(|r| r.route_id == route_id)
    }
}

#[derive(Debug)]
pub struct RoutingTable {
    current: ArcSwap<RoutingSnapshot>,
    changes: watch::Sender<u64>,
}

impl RoutingTable {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(RoutingSnapshot::empty()),
            changes,
        }
    }

    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    /// Change token: yields the version of each newly published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Replace the current snapshot wholesale and notify subscribers.
    pub fn publish(&self, routes: Vec<RouteEntry>, clusters: Vec<ClusterEntry>) -> Arc<RoutingSnapshot> {
        let version = self.current.load().version + 1;
        let snapshot = Arc::new(RoutingSnapshot {
            version,
            generated_at: SystemTime::now(),
            routes,
            clusters,
        });
        self.current.store(snapshot.clone());
        self.changes.send_replace(version);
        snapshot
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
