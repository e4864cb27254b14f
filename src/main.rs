//! Service-mesh control plane daemon.
//!
//! ```text
//!                  ┌──────────────────────────── CONTROL PLANE ───────────────────────────┐
//!                  │                                                                      │
//!   registry  ─────┼─▶ health prober ──▶ breakers ──▶ probes ──▶ health cache            │
//!   (static /      │        │                                                             │
//!    reloaded)     │        └──────── health status published back to registry ──────────┼──┐
//!                  │                                                                      │  │
//!             ◀────┼─── load balancer (select / report / stats) ◀── admin API ◀───────────┼──┼── callers
//!                  │                                                                      │  │
//!                  │    routing generator ──▶ routing table snapshot + change token ──────┼──┼─▶ proxy
//!                  └──────────────────────────────────────────────────────────────────────┘  │
//!                                                   ▲                                        │
//!                                                   └────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use mesh_control_plane::config::{load_config, ConfigWatcher, MeshConfig};
use mesh_control_plane::lifecycle::{ControlPlane, SignalEvent, Signals};
use mesh_control_plane::observability::{logging, metrics};
use mesh_control_plane::registry::InMemoryRegistry;

#[derive(Parser)]
#[command(name = "mesh-control-plane")]
#[command(about = "Health probing, load balancing and routing-table generation for a service mesh", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "mesh.toml")]
    config: PathBuf,

    /// Overrides `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_exists = args.config.exists();
    let config = if config_exists {
        load_config(&args.config)?
    } else {
        MeshConfig::default()
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    logging::init_logging(&level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mesh-control-plane starting");
    if config_exists {
        tracing::info!(
            path = %args.config.display(),
            instances = config.registry.instances.len(),
            "Configuration loaded"
        );
    } else {
        tracing::warn!(path = %args.config.display(), "Config file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = InMemoryRegistry::from_instances(config.registry.to_instances())?;
    let plane = ControlPlane::start(config, Arc::new(registry.clone())).await?;

    let (watcher, mut updates) = ConfigWatcher::new(&args.config);
    let _watcher = if config_exists {
        match watcher.run() {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::error!(error = %e, "Config hot reload unavailable");
                None
            }
        }
    } else {
        None
    };

    let mut signals = Signals::new()?;
    loop {
        tokio::select! {
            event = signals.recv() => match event {
                SignalEvent::Shutdown => break,
                SignalEvent::Reload => reload_from(&args.config, &registry),
            },
            Some(updated) = updates.recv() => reseed(&registry, &updated),
        }
    }

    plane.shutdown().await;
    Ok(())
}

fn reload_from(path: &Path, registry: &InMemoryRegistry) {
    match load_config(path) {
        Ok(updated) => reseed(registry, &updated),
        Err(e) => tracing::error!(error = %e, "Reload failed, keeping current registry"),
    }
}

/// Only the registry section is live-reloadable; other changes need a restart.
fn reseed(registry: &InMemoryRegistry, config: &MeshConfig) {
    if let Err(e) = registry.replace_all(config.registry.to_instances()) {
        tracing::error!(error = %e, "Rejected reloaded registry section");
    }
}
