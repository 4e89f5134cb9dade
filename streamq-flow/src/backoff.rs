//! Exponential backoff with jitter.
//!
//! Used by pollers for transient fetch failures and by the dispatcher between
//! send attempts. The delay doubles from `min` up to `max`; jitter spreads it
//! over `[delay / 2, delay]` so restarted clients do not retry in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::error::{FlowError, FlowResult};

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// First delay.
    pub min: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: u32,
    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl BackoffConfig {
    /// Creates a doubling backoff between `min` and `max` with jitter.
    #[must_use]
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            multiplier: 2,
            jitter: true,
        }
    }

    /// Disables jitter (exact delays, for tests).
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            min: Duration::from_millis(10),
            max: Duration::from_millis(80),
            multiplier: 2,
            jitter: false,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `min` is zero, `min > max` or the
    /// multiplier is below 1.
    pub fn validate(&self) -> FlowResult<()> {
        if self.min.is_zero() {
            return Err(FlowError::InvalidConfig {
                message: "backoff min must be > 0".to_string(),
            });
        }
        if self.min > self.max {
            return Err(FlowError::InvalidConfig {
                message: format!("backoff min {:?} exceeds max {:?}", self.min, self.max),
            });
        }
        if self.multiplier == 0 {
            return Err(FlowError::InvalidConfig {
                message: "backoff multiplier must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(5))
    }
}

/// Stateful exponential backoff.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Creates a backoff at its first attempt.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns the delay before the next retry and advances the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        if self.config.jitter && delay > Duration::ZERO {
            let half = delay / 2;
            rand::thread_rng().gen_range(half..=delay)
        } else {
            delay
        }
    }

    /// Delay of the current attempt without jitter.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        let factor = self.config.multiplier.saturating_pow(self.attempt);
        self.config
            .min
            .checked_mul(factor)
            .map_or(self.config.max, |d| d.min(self.config.max))
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Starts over from the minimum delay (after a success).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
