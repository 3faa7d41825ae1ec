//! Request pacing shared by the HTTP backends.
//!
//! Every backend owns one [`Throttle`]: a token-bucket rate limiter plus the
//! exponential backoff schedule used between retry attempts.

use crate::config::RateLimitConfig;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct Throttle {
    limiter: DefaultDirectRateLimiter,
    config: RateLimitConfig,
}

impl Throttle {
    pub fn new(config: RateLimitConfig) -> Self {
        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rps)),
            config,
        }
    }

    /// Wait until the rate limiter admits one more request.
    pub async fn ready(&self) {
        self.limiter.until_ready().await;
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.max(1)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.base_delay_ms);
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        base.saturating_mul(factor).min(MAX_BACKOFF)
    }

    pub async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.delay_for(attempt)).await;
    }
}
