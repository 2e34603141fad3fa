//! Exponential backoff with jitter

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized either way (0 disables jitter)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 300_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next retry; grows with every call until `reset`
    pub fn next_backoff(&mut self) -> Duration {
        let exp = self.config.multiplier.powi(self.attempt as i32);
        let base = (self.config.initial_ms as f64 * exp).min(self.config.max_ms as f64);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let millis = if jitter > 0.0 {
            let spread = base * jitter;
            base + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            base
        };
        Duration::from_millis(millis.max(0.0) as u64)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_ms: 100,
            max_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_doubles_until_cap() {
        let mut state = BackoffState::new(no_jitter());
        let delays: Vec<u64> = (0..6).map(|_| state.next_backoff().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_reset() {
        let mut state = BackoffState::new(no_jitter());
        state.next_backoff();
        state.next_backoff();
        state.reset();
        assert_eq!(state.next_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut state = BackoffState::new(BackoffConfig {
            jitter: 0.5,
            ..no_jitter()
        });
        let first = state.next_backoff().as_millis() as u64;
        assert!((50..=150).contains(&first));
    }
}
