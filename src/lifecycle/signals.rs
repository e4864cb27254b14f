//! OS signal handling.
//!
//! SIGINT / SIGTERM request shutdown; SIGHUP requests a config reload.

use std::io;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

/// Registered signal streams. Create once and call `recv` in a loop.
pub struct Signals {
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(unix)]
    hangup: Signal,
}

impl Signals {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
            #[cfg(unix)]
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
                SignalEvent::Shutdown
            }
            _ = self.terminate.recv() => {
                tracing::info!("Received SIGTERM");
                SignalEvent::Shutdown
            }
            _ = self.hangup.recv() => {
                tracing::info!("Received SIGHUP");
                SignalEvent::Reload
            }
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> SignalEvent {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        SignalEvent::Shutdown
    }
}
