//! Reconnect pacing
//!
//! Delays between connection attempts grow geometrically from the configured
//! floor to the cap, with a random jitter fraction on top so a fleet of
//! agents does not reconnect in lockstep after a server restart.

use std::time::Duration;

use rand::Rng;

use rp_core::config::BackoffConfig;

/// Growing delay schedule for reconnection attempts
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a schedule from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a schedule with explicit parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; each call advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.powi(self.attempt as i32);
        let base = self.initial.mul_f64(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter > 0.0 {
            base.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..self.jitter))
        } else {
            base
        }
    }

    /// Start the schedule over, after a connection that actually worked.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
