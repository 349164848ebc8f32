use governor::{clock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::warn;

use crate::config::RateLimitConfig;

/// Token bucket guarding control-surface writes. Reads are never limited.
pub struct ControlRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    enabled: bool,
}

impl ControlRateLimiter {
    /// Zero rates are raised to 1 so a bad config cannot lock out every
    /// write.
    pub fn new(commands_per_second: u32, burst_capacity: u32, enabled: bool) -> Self {
        let quota = Quota::per_second(Self::non_zero("commands_per_second", commands_per_second))
            .allow_burst(Self::non_zero("burst_capacity", burst_capacity));

        Self {
            limiter: RateLimiter::direct(quota),
            enabled,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.commands_per_second,
            config.burst_capacity,
            config.enabled,
        )
    }

    /// Returns false when the write should be rejected. Never waits.
    pub fn check(&self) -> bool {
        if !self.enabled {
            return true;
        }

        self.limiter.check().is_ok()
    }

    fn non_zero(name: &str, value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap_or_else(|| {
            warn!("rate_limit.{} is 0, using 1", name);
            NonZeroU32::MIN
        })
    }
}
