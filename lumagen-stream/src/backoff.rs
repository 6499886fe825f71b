//! Exponential reconnect backoff with jitter

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Delay for the given attempt number
///
/// `min(initial * 2^attempt * (1 + jitter * unit), max)` where `unit` is a
/// sample from `[0, 1)`. With `jitter <= 1` the jittered delay for attempt
/// `n` stays below the un-jittered delay for `n + 1`, so the sequence never
/// decreases regardless of the samples drawn.
pub fn delay_for(config: &ReconnectConfig, attempt: u32, unit: f64) -> Duration {
    let jitter = config.jitter.clamp(0.0, 1.0);
    let unit = unit.clamp(0.0, 1.0 - f64::EPSILON);
    let exponential = config.initial_delay.as_secs_f64() * 2f64.powi(attempt.min(62) as i32);
    let jittered = exponential * (1.0 + jitter * unit);
    Duration::from_secs_f64(jittered.min(config.max_delay.as_secs_f64()))
}

/// Tracks consecutive failed attempts for one supervisor
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        let unit = rand::thread_rng().gen::<f64>();
        let delay = delay_for(&self.config, self.attempt, unit);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Whether a session that lasted `connected_for` earns a reset
    pub fn is_stable(&self, connected_for: Duration) -> bool {
        connected_for > self.config.stability_threshold
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
