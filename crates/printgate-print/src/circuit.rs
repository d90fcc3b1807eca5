// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Circuit breaker for the single remote print server.
//
// If the print server is repeatedly refusing connections, stop hammering it
// with requests that will just time out.  While the circuit is open the
// registry fails fast and callers see stale cached data.  After a cooldown
// one probe request is allowed through to test recovery.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — requests pass through.
    Closed,
    /// Too many connect failures — requests are blocked, cooldown running.
    Open,
    /// Cooldown expired — one probe request allowed through.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_error: Option<String>,
}

/// Process-wide breaker guarding the print-server endpoint.
///
/// Toggled only by the protocol layer on connect success/failure; consulted
/// by the registry before a refresh attempt.
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    /// Consecutive failures before the circuit opens.
    failure_threshold: u32,
    /// Cooldown before an open circuit allows a probe.
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_error: None,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Whether a request may go out now.
    ///
    /// `true` while closed or half-open (probe allowed); `false` while the
    /// cooldown of an open circuit is still running.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.cooldown);
                if expired {
                    info!("circuit half-open, allowing probe request");
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    debug!("circuit open, failing fast");
                    false
                }
            }
        }
    }

    /// Record a successful connect; closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.state != CircuitState::Closed {
            info!("print server recovered, circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.last_error = None;
    }

    /// Record a connect failure; opens the circuit once the threshold is
    /// reached (immediately when it fails during a half-open probe).
    pub fn record_failure(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.consecutive_failures += 1;
        inner.last_error = Some(error.to_string());

        let should_open = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if should_open && inner.state != CircuitState::Open {
            warn!(
                failures = inner.consecutive_failures,
                error, "circuit opened for print server"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last_error
            .clone()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure("refused");
        breaker.record_failure("refused");
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure("refused");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_closes_and_resets() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("refused");
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
        assert!(breaker.last_error().is_none());
    }

    #[test]
    fn probe_allowed_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure("refused");
        // Zero cooldown: the next check transitions to half-open.
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // A failing probe reopens immediately.
        breaker.record_failure("still down");
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
