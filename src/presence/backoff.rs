//! Reconnect delay schedule for the presence feed.

use std::time::Duration;

use rand::Rng;

use crate::config::PresenceConfig;

/// Floor for every delay, whatever the configuration says.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Capped exponential backoff.
///
/// The n-th consecutive failure waits `initial * multiplier^n`, never more
/// than `max`, spread by up to `jitter` of the delay in either direction.
/// The delay is never zero.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Creates a schedule from the presence settings.
    #[must_use]
    pub fn new(config: &PresenceConfig) -> Self {
        let initial = config.initial_backoff.max(MIN_DELAY);
        Self {
            initial,
            max: config.max_backoff.max(initial),
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 0.99),
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter <= 0.0 {
            return base;
        }

        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = base.mul_f64(1.0 + spread).min(self.max);
        if jittered.is_zero() {
            self.initial
        } else {
            jittered
        }
    }

    /// Restarts the schedule after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let max_secs = self.max.as_secs_f64();
        let secs = self.initial.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
