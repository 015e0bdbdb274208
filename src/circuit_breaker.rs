// =============================================================================
// circuit_breaker.rs — KNOWING WHEN TO STOP ASKING
// =============================================================================
//
// A run asks the same upstream once per symbol. When screener.in starts
// answering every request with a 503, there is no point asking it 40 more
// times in a row: each of those symbols just gets "unknown" ratios right away.
//
// Classic three-state breaker:
// - Closed: requests flow, consecutive failures are counted
// - Open: requests are refused until the reset timeout elapses
// - HalfOpen: one trial request; success closes, failure re-opens
// =============================================================================

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    total_trips: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub trips: u64,
}

/// One breaker guards one upstream.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                total_trips: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    /// `Ok` when a request may go out, `Err(CircuitOpen)` otherwise.
    pub fn check(&self) -> Result<(), FetchError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if cooled {
                    info!(breaker = %self.name, "circuit OPEN -> HALF_OPEN, sending a trial request");
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(FetchError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.name, "circuit HALF_OPEN -> CLOSED");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.total_trips += 1;
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "circuit TRIPPED, skipping this upstream for {}s",
                self.reset_timeout.as_secs()
            );
        }
    }

    /// Record the outcome of a guarded call and pass it through. Errors that
    /// only concern the one item asked for (404, undecodable body) leave the
    /// failure count alone.
    pub fn observe<T>(&self, result: Result<T, FetchError>) -> Result<T, FetchError> {
        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.is_upstream_failure() => self.record_failure(),
            Err(_) => {}
        }
        result
    }

    /// Name, state and trip count, for the run summary.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            trips: inner.total_trips,
        }
    }
}
