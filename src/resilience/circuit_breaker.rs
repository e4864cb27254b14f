//! Circuit breaker for per-key failure isolation.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast without running
//! - Half-Open: break elapsed, the next outcome decides
//!
//! # State Transitions
//! ```text
//! Closed → Open: calls in sampling window >= minimum_throughput
//!                AND failures / calls >= failure_ratio
//! Open → Half-Open: first call after break_duration
//! Half-Open → Closed: next call succeeds
//! Half-Open → Open: next call fails
//! ```
//!
//! # Design Decisions
//! - Only the state decision and transition bookkeeping hold the lock;
//!   admitted calls run concurrently
//! - Sliding window is bucketed (10 buckets per sampling duration)
//! - Transitions are logged, counted and broadcast to subscribers

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

const WINDOW_BUCKETS: u32 = 10;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for a single breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerOptions {
    /// Failure ratio (0.0..=1.0) at which the circuit opens.
    pub failure_ratio: f64,
    /// Window over which the ratio is computed.
    pub sampling_duration: Duration,
    /// Calls required in the window before the ratio is considered.
    pub minimum_throughput: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_duration: Duration::from_secs(30),
            minimum_throughput: 10,
            break_duration: Duration::from_secs(30),
        }
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreakerOptions {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_ratio: config.failure_ratio,
            sampling_duration: Duration::from_millis(config.sampling_duration_ms),
            minimum_throughput: config.minimum_throughput,
            break_duration: Duration::from_millis(config.break_duration_ms),
        }
    }
}

/// Emitted on every state change.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: SystemTime,
}

/// Returned instead of running the action while the circuit is open.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    pub name: String,
}

/// Outcome of `CircuitBreaker::execute`.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Rejected without running the action.
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The action ran and failed.
    #[error("{0}")]
    Failed(E),
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

/// Time-bucketed success/failure counts.
#[derive(Debug)]
struct SlidingWindow {
    span: Duration,
    bucket_width: Duration,
    buckets: VecDeque<Bucket>,
}

impl SlidingWindow {
    fn new(span: Duration) -> Self {
        let bucket_width = (span / WINDOW_BUCKETS).max(Duration::from_millis(1));
        Self {
            span,
            bucket_width,
            buckets: VecDeque::with_capacity(WINDOW_BUCKETS as usize + 1),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.started) >= self.span {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, success: bool) {
        self.prune(now);
        let needs_bucket = match self.buckets.back() {
            Some(last) => now.saturating_duration_since(last.started) >= self.bucket_width,
            None => true,
        };
        if needs_bucket {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            if success {
                bucket.successes += 1;
            } else {
                bucket.failures += 1;
            }
        }
    }

    /// (total calls, failed calls) currently inside the window.
    fn totals(&mut self, now: Instant) -> (u32, u32) {
        self.prune(now);
        self.buckets.iter().fold((0, 0), |(total, failed), b| {
            (total + b.successes + b.failures, failed + b.failures)
        })
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    window: SlidingWindow,
}

/// A named circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    options: CircuitBreakerOptions,
    inner: Mutex<BreakerInner>,
    events: Option<broadcast::Sender<StateTransition>>,
}

impl CircuitBreaker {
    /// Create a standalone breaker (transitions are logged but not broadcast).
    pub fn new(name: impl Into<String>, options: CircuitBreakerOptions) -> Self {
        Self::with_events(name, options, None)
    }

    pub(crate) fn with_events(
        name: impl Into<String>,
        options: CircuitBreakerOptions,
        events: Option<broadcast::Sender<StateTransition>>,
    ) -> Self {
        let window = SlidingWindow::new(options.sampling_duration);
        Self {
            name: name.into(),
            options,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                window,
            }),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CircuitBreakerOptions {
        &self.options
    }

    /// Last recorded state. An expired Open state only moves to Half-Open on the next call.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `action` through the breaker.
    ///
    /// While open, the action is never invoked and `CircuitError::Open` is returned.
    pub async fn execute<T, E, F, Fut>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;

        match action().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Failed(e))
            }
        }
    }

    /// Decide whether a call may proceed, moving Open → Half-Open once the break has elapsed.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => None,
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|at| at.elapsed() >= self.options.break_duration)
                        .unwrap_or(true);
                    if !elapsed {
                        return Err(CircuitOpenError {
                            name: self.name.clone(),
                        });
                    }
                    Some(self.transition(&mut inner, CircuitState::HalfOpen))
                }
            }
        };

        if let Some(t) = transition {
            self.emit(t);
        }
        Ok(())
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::HalfOpen => Some(self.transition(&mut inner, CircuitState::Closed)),
                CircuitState::Closed => {
                    inner.window.record(Instant::now(), true);
                    self.evaluate(&mut inner)
                }
                // Late result from a call admitted before the circuit opened.
                CircuitState::Open => None,
            }
        };

        if let Some(t) = transition {
            self.emit(t);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::HalfOpen => Some(self.transition(&mut inner, CircuitState::Open)),
                CircuitState::Closed => {
                    inner.window.record(Instant::now(), false);
                    self.evaluate(&mut inner)
                }
                CircuitState::Open => None,
            }
        };

        if let Some(t) = transition {
            self.emit(t);
        }
    }

    fn evaluate(&self, inner: &mut BreakerInner) -> Option<StateTransition> {
        let (total, failed) = inner.window.totals(Instant::now());
        if total == 0 || total < self.options.minimum_throughput {
            return None;
        }
        let ratio = f64::from(failed) / f64::from(total);
        if ratio >= self.options.failure_ratio {
            tracing::debug!(
                breaker = %self.name,
                total,
                failed,
                ratio,
                "Failure ratio threshold reached"
            );
            Some(self.transition(inner, CircuitState::Open))
        } else {
            None
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) -> StateTransition {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.reset();
            }
            CircuitState::HalfOpen => {}
        }
        StateTransition {
            breaker: self.name.clone(),
            from,
            to,
            at: SystemTime::now(),
        }
    }

    fn emit(&self, transition: StateTransition) {
        match transition.to {
            CircuitState::Open => tracing::warn!(
                breaker = %transition.breaker,
                from = %transition.from,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                breaker = %transition.breaker,
                "Circuit breaker half-open, allowing trial call"
            ),
            CircuitState::Closed => tracing::info!(
                breaker = %transition.breaker,
                from = %transition.from,
                "Circuit breaker closed"
            ),
        }
        metrics::record_breaker_transition(&transition.breaker, transition.from, transition.to);

        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.send(transition);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
