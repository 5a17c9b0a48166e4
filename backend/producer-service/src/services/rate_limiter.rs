//! Per-batch submission throttle
//!
//! Pauses the producing task for a fixed interval once every
//! `rate_per_second` submissions. State is only the submission index, so each
//! batch starts fresh and concurrent batches are throttled independently.

use config_core::ConfigError;
use std::time::Duration;
use tracing::debug;

pub const THROTTLE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    rate_per_second: u64,
}

impl RateLimiter {
    pub fn new(rate_per_second: i64) -> Result<Self, ConfigError> {
        match u64::try_from(rate_per_second) {
            Ok(rate) if rate > 0 => Ok(Self {
                rate_per_second: rate,
            }),
            _ => Err(ConfigError::invalid(
                "PRODUCER_RATE_LIMIT_PER_SECOND",
                format!("must be > 0, got {}", rate_per_second),
            )),
        }
    }

    pub fn rate_per_second(&self) -> u64 {
        self.rate_per_second
    }

    /// True before every `rate_per_second`-th submission after the first
    pub fn should_pause(&self, index: usize) -> bool {
        index > 0 && index as u64 % self.rate_per_second == 0
    }

    /// Call before submitting the message at zero-based `index` in its batch
    pub async fn throttle(&self, index: usize) {
        if self.should_pause(index) {
            debug!(index, rate = self.rate_per_second, "Rate limit reached, pausing");
            tokio::time::sleep(THROTTLE_PAUSE).await;
        }
    }
}
