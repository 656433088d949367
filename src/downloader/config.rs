//! Dump configuration constants and retry backoff

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of features per chunk file
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// Default number of features requested per page
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Log a progress line every N features
pub const PROGRESS_LOG_INTERVAL: u64 = 10_000;

/// Base of the exponential backoff (seconds)
pub const BACKOFF_MULTIPLIER_SECS: u64 = 1;

/// Lower bound of the exponential part of the backoff (seconds).
/// Rate-limited map servers need several seconds before the window resets.
pub const BACKOFF_MIN_SECS: u64 = 10;

/// Upper bound of the exponential part of the backoff (seconds)
pub const BACKOFF_MAX_SECS: u64 = 120;

/// Random jitter added on top of every backoff delay (seconds, inclusive)
pub const BACKOFF_JITTER_SECS: (u64, u64) = (1, 12);

/// Backoff applied between attempts of the streaming phase
///
/// The delay for the `n`-th consecutive failure (1-based) is
/// `clamp(multiplier * 2^(n-1), min, max) + uniform(jitter_min, jitter_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay, doubled on each consecutive failure
    pub multiplier: Duration,
    /// Lower bound of the exponential part
    pub min: Duration,
    /// Upper bound of the exponential part
    pub max: Duration,
    /// Smallest random jitter
    pub jitter_min: Duration,
    /// Largest random jitter
    pub jitter_max: Duration,
    /// Give up after this many consecutive failures (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            multiplier: Duration::from_secs(BACKOFF_MULTIPLIER_SECS),
            min: Duration::from_secs(BACKOFF_MIN_SECS),
            max: Duration::from_secs(BACKOFF_MAX_SECS),
            jitter_min: Duration::from_secs(BACKOFF_JITTER_SECS.0),
            jitter_max: Duration::from_secs(BACKOFF_JITTER_SECS.1),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Policy without delays, for tests and dry runs
    pub fn immediate() -> Self {
        Self {
            multiplier: Duration::ZERO,
            min: Duration::ZERO,
            max: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
            max_attempts: None,
        }
    }

    /// Limit the number of consecutive failures
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Exponential part of the delay for consecutive failure `failures` (1-based)
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.multiplier.saturating_mul(1u32 << exponent);
        delay.max(self.min).min(self.max.max(self.min))
    }

    /// Full delay, jitter included, for consecutive failure `failures`
    pub fn delay(&self, failures: u32) -> Duration {
        self.base_delay(failures) + self.jitter()
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let millis = rand::thread_rng()
            .gen_range(self.jitter_min.as_millis() as u64..=self.jitter_max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}
