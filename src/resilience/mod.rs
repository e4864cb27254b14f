//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Probe (or any guarded call) for key K:
//!     → factory.rs (get or create breaker K)
//!     → circuit_breaker.rs (admit or fail fast, record outcome)
//!     → transition events → logs, metrics, broadcast subscribers
//! ```
//!
//! # Design Decisions
//! - One breaker per monitored key, created lazily, kept for the process lifetime
//! - Fail fast while open; the rejection is a distinct error, not an ordinary failure
//! - No framework dependency: explicit state machine over a bucketed window

pub mod circuit_breaker;
pub mod factory;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerOptions, CircuitError, CircuitOpenError, CircuitState,
    StateTransition,
};
pub use factory::{BreakerStatus, CircuitBreakerFactory};
