//! Circuit breaker guarding one exchange connection.
//!
//! # State Machine
//!
//! ```text
//! CLOSED    → OPEN      (failure_count reaches failure_threshold)
//! OPEN      → HALF_OPEN (timeout elapsed, checked lazily on every read)
//! HALF_OPEN → CLOSED    (success_threshold successes)
//! HALF_OPEN → OPEN      (any failure, fresh opened_at)
//! ```
//!
//! Failures recorded while OPEN are counted but do not restart the timer.
//! The failure count survives the move to HALF_OPEN and is only cleared by a
//! success in CLOSED or by closing.
//!
//! One breaker exists per monitored dependency and is owned by whoever drives
//! that dependency, so every method takes `&mut self`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut breaker = CircuitBreaker::new("kraken", CircuitBreakerConfig::default());
//!
//! if breaker.can_attempt() {
//!     match connect().await {
//!         Ok(_) => breaker.record_success(),
//!         Err(_) => breaker.record_failure(),
//!     }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::infrastructure::metrics;

/// Coarse breaker phase, used for logs, metrics and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerPhase {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// Probing for recovery.
    HalfOpen,
}

impl BreakerPhase {
    /// Label used in metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until `opened_at + timeout`.
    Open {
        /// When the breaker (last) opened.
        opened_at: Instant,
        /// Failures counted so far.
        failure_count: u32,
    },
    /// Probing for recovery.
    HalfOpen,
}

impl BreakerState {
    /// Coarse phase.
    #[must_use]
    pub const fn phase(&self) -> BreakerPhase {
        match self {
            Self::Closed => BreakerPhase::Closed,
            Self::Open { .. } => BreakerPhase::Open,
            Self::HalfOpen => BreakerPhase::HalfOpen,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time to stay open before probing.
    pub timeout: Duration,
    /// Successes in half-open needed to close.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// Circuit breaker for one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    total_successes: u64,
    total_failures: u64,
    state_transitions: u64,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            total_successes: 0,
            total_failures: 0,
            state_transitions: 0,
        }
    }

    /// Dependency name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state after lazy promotion.
    pub fn state(&mut self) -> BreakerState {
        self.promote();
        self.state
    }

    /// Whether a call may be attempted now.
    pub fn can_attempt(&mut self) -> bool {
        self.promote();
        !matches!(self.state, BreakerState::Open { .. })
    }

    /// Consecutive failures counted so far.
    pub fn failure_count(&mut self) -> u32 {
        self.promote();
        self.failure_count
    }

    /// Remaining open time, `None` unless open.
    pub fn retry_after(&mut self) -> Option<Duration> {
        self.promote();
        match self.state {
            BreakerState::Open { opened_at, .. } => {
                Some(self.config.timeout.saturating_sub(opened_at.elapsed()))
            }
            BreakerState::Closed | BreakerState::HalfOpen => None,
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.promote();
        self.total_successes += 1;
        match self.state {
            BreakerState::Closed => self.failure_count = 0,
            BreakerState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition(BreakerState::Closed);
                    self.failure_count = 0;
                    self.success_count = 0;
                }
            }
            BreakerState::Open { .. } => {
                tracing::debug!(name = %self.name, "Success recorded while circuit is OPEN");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        self.promote();
        self.total_failures += 1;
        self.failure_count = self.failure_count.saturating_add(1);
        match self.state {
            BreakerState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.open();
                }
            }
            BreakerState::Open { opened_at, .. } => {
                self.state = BreakerState::Open {
                    opened_at,
                    failure_count: self.failure_count,
                };
            }
            BreakerState::HalfOpen => {
                self.success_count = 0;
                self.open();
            }
        }
    }

    /// Snapshot for logging and export.
    pub fn metrics(&mut self) -> CircuitBreakerMetrics {
        let retry_after = self.retry_after();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: self.state.phase(),
            failure_count: self.failure_count,
            success_count: self.success_count,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            state_transitions: self.state_transitions,
            retry_after,
        }
    }

    fn open(&mut self) {
        self.transition(BreakerState::Open {
            opened_at: Instant::now(),
            failure_count: self.failure_count,
        });
    }

    /// OPEN → `HALF_OPEN` once the timeout has elapsed.
    fn promote(&mut self) {
        if let BreakerState::Open { opened_at, .. } = self.state
            && opened_at.elapsed() >= self.config.timeout
        {
            self.success_count = 0;
            self.transition(BreakerState::HalfOpen);
        }
    }

    fn transition(&mut self, to: BreakerState) {
        let from = self.state.phase();
        self.state = to;
        self.state_transitions += 1;
        metrics::record_breaker_transition(&self.name, to.phase());

        match to {
            BreakerState::Open { failure_count, .. } => tracing::warn!(
                name = %self.name,
                from = %from,
                to = "OPEN",
                failure_count,
                "Circuit breaker opened"
            ),
            BreakerState::HalfOpen => tracing::info!(
                name = %self.name,
                from = %from,
                to = "HALF_OPEN",
                "Circuit breaker testing"
            ),
            BreakerState::Closed => tracing::info!(
                name = %self.name,
                from = %from,
                to = "CLOSED",
                "Circuit breaker closed"
            ),
        }
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Dependency name.
    pub name: String,
    /// Current phase.
    pub state: BreakerPhase,
    /// Failures counted toward the threshold.
    pub failure_count: u32,
    /// Successes counted while half-open.
    pub success_count: u32,
    /// Lifetime successes.
    pub total_successes: u64,
    /// Lifetime failures.
    pub total_failures: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
    /// Remaining open time.
    pub retry_after: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_secs(10),
            success_threshold: 2,
        }
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.success_threshold, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_is_closed() {
        let mut breaker = CircuitBreaker::new("test", config());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_attempt());
        assert_eq!(breaker.retry_after(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let mut breaker = CircuitBreaker::new("test", config());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_attempt());

        breaker.record_failure();
        assert!(!breaker.can_attempt());
        assert!(matches!(
            breaker.state(),
            BreakerState::Open {
                failure_count: 3,
                ..
            }
        ));
        assert_eq!(breaker.retry_after(), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_in_closed_resets_failures() {
        let mut breaker = CircuitBreaker::new("test", config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_open_keeps_timer() {
        let mut breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        let BreakerState::Open { opened_at, .. } = breaker.state() else {
            panic!("expected open");
        };

        tokio::time::advance(Duration::from_secs(4)).await;
        breaker.record_failure();

        assert_eq!(
            breaker.state(),
            BreakerState::Open {
                opened_at,
                failure_count: 4
            }
        );
        assert_eq!(breaker.retry_after(), Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_to_half_open_to_closed() {
        let mut breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.can_attempt());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // failure count is carried into half-open
        assert_eq!(breaker.failure_count(), 3);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);

        let metrics = breaker.metrics();
        assert_eq!(metrics.state, BreakerPhase::Closed);
        assert_eq!(metrics.state_transitions, 3);
        assert_eq!(metrics.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timer() {
        let mut breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        let state = breaker.state();
        assert!(matches!(
            state,
            BreakerState::Open {
                failure_count: 4,
                ..
            }
        ));
        assert_eq!(breaker.retry_after(), Some(Duration::from_secs(10)));

        // success count was reset: two more successes are needed after reopening
        tokio::time::advance(Duration::from_secs(10)).await;
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(BreakerPhase::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(BreakerPhase::Open.as_str(), "open");
    }
}
