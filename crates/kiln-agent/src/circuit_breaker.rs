//! Circuit breaker for generative API calls
//!
//! One breaker per client instance. After `threshold` consecutive failures
//! the circuit opens and calls are rejected until the cool-down elapses.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting calls
    Open,
    /// Cool-down elapsed, next call probes recovery
    HalfOpen,
}

/// Consecutive-failure circuit breaker
///
/// ```
/// use kiln_agent::CircuitBreaker;
///
/// let cb = CircuitBreaker::new(2, 60);
/// cb.record_failure();
/// cb.record_failure();
/// assert!(!cb.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    /// Millis since `epoch` of the most recent failure
    last_failure: AtomicU64,
    epoch: Instant,
    threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout_secs: u64) -> Self {
        Self::with_timeout(threshold, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            epoch: Instant::now(),
            threshold: threshold.max(1),
            timeout,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn since_last_failure_ms(&self) -> u64 {
        self.now_ms()
            .saturating_sub(self.last_failure.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            CircuitState::Closed
        } else if self.since_last_failure_ms() >= self.timeout.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(self.now_ms(), Ordering::Relaxed);
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Time until the circuit half-opens; zero unless open
    pub fn time_until_retry(&self) -> Duration {
        match self.state() {
            CircuitState::Open => {
                let remaining = (self.timeout.as_millis() as u64)
                    .saturating_sub(self.since_last_failure_ms());
                Duration::from_millis(remaining)
            }
            _ => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        // 3 failures, 60 second cool-down
        Self::new(3, 60)
    }
}
