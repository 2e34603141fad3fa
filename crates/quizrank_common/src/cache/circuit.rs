//! Circuit breaker guarding the primary cache tier.
//!
//! Failures are counted over a sliding window rather than consecutively: a
//! shared cache that times out on every other call still trips the breaker.
//! While open, callers go straight to the local tier. After the cooldown the
//! breaker lets traffic through again and closes once enough calls succeed.

use crate::config::CacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Primary tier in use
    Closed,
    /// Primary tier skipped, reads and writes go to the local tier
    Open,
    /// Cooldown elapsed, trying the primary tier again
    HalfOpen,
}

/// Trip and recovery thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSettings {
    /// Failures within `failure_window` that open the circuit
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
    /// Successes in a row while half-open that close the circuit
    pub success_threshold: u32,
}

impl CircuitSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            failure_threshold: config.circuit_failure_threshold.max(1),
            failure_window: config.circuit_failure_window(),
            cooldown: config.circuit_cooldown(),
            success_threshold: config.circuit_success_threshold.max(1),
        }
    }
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    settings: CircuitSettings,
    state: CircuitState,
    failures: VecDeque<Instant>,
    trial_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitSettings) -> Self {
        Self {
            settings,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            trial_successes: 0,
            opened_at: None,
        }
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    fn record_failure_at(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.failures.push_back(now);
                self.expire(now);
                if self.failures.len() >= self.settings.failure_threshold as usize {
                    self.open(now);
                }
            }
            // one failed trial is enough
            CircuitState::HalfOpen => self.open(now),
            CircuitState::Open => {}
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_successes += 1;
            if self.trial_successes >= self.settings.success_threshold {
                self.close();
            }
        }
    }

    /// True while calls must skip the primary tier
    pub fn is_open(&mut self) -> bool {
        self.is_open_at(Instant::now())
    }

    fn is_open_at(&mut self, now: Instant) -> bool {
        if self.state == CircuitState::Open {
            let cooled = self
                .opened_at
                .map_or(true, |at| now.duration_since(at) >= self.settings.cooldown);
            if cooled {
                self.state = CircuitState::HalfOpen;
                self.trial_successes = 0;
            }
        }
        self.state == CircuitState::Open
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failures currently inside the window
    pub fn recent_failures(&self) -> usize {
        self.failures.len()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) < self.settings.failure_window {
                break;
            }
            self.failures.pop_front();
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.failures.clear();
        self.trial_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failures.clear();
        self.trial_successes = 0;
        self.opened_at = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitSettings::default())
    }
}
