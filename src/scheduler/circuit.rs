//! Circuit breaker guarding the ASR backend (§3, §4.5, §8).
//!
//! Owned exclusively by the Scheduler's consumer task; no lock is needed
//! for the live instance. [`CircuitBreaker::snapshot`] is published for
//! read-only consumption by `/api/ai/status`.

use crate::config::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view published via `/api/ai/status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Whether ASR work should be attempted right now. A half-open probe is
    /// allowed through exactly once the recovery timeout has elapsed; the
    /// breaker transitions to `HalfOpen` as a side effect of the check.
    pub fn allow(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => self.open(),
            _ => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, recovery: Duration) -> SchedulerConfig {
        SchedulerConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn closed_until_threshold_reached() {
        let mut breaker = CircuitBreaker::new(&config(3, Duration::from_secs(60)));
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
    }

    #[test]
    fn open_blocks_calls_until_recovery_timeout_elapses() {
        let mut breaker = CircuitBreaker::new(&config(1, Duration::from_millis(10)));
        breaker.record_failure();
        assert!(!breaker.allow());
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.allow());
        assert_eq!(breaker.snapshot().state, CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let mut breaker = CircuitBreaker::new(&config(1, Duration::from_millis(5)));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(&config(3, Duration::from_secs(60)));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }
}
