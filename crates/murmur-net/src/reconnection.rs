//! Exponential backoff for re-establishing a lost session.
//!
//! [`ReconnectState`] hands out increasing, jittered delays until the attempt
//! budget runs out. The session layer drives the actual attempts.

use std::time::Duration;

use rand::Rng;

/// Configuration for client-side reconnection behaviour.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay. Default: 30 s.
    pub max_delay: Duration,
    /// Attempts before giving up. Default: 10.
    pub max_attempts: u32,
    /// Jitter factor in `0.0..=1.0`, applied as ±jitter. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    /// Build from millisecond settings, keeping default multiplier and jitter.
    pub fn from_millis(initial_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms.max(initial_ms)),
            max_attempts,
            ..Default::default()
        }
    }
}

/// Tracks the attempt count and computes the next backoff delay.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    /// Returns `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.current_delay;
        self.attempts += 1;

        let jittered = if self.config.jitter > 0.0 {
            let jitter = self.config.jitter.min(1.0);
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        self.current_delay = self
            .current_delay
            .mul_f64(self.config.backoff_multiplier)
            .min(self.config.max_delay);

        Some(jittered.min(self.config.max_delay))
    }

    /// Start over after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Errors produced while reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Every configured attempt failed.
    #[error("maximum reconnection attempts ({0}) exhausted")]
    MaxAttemptsExhausted(u32),
}
