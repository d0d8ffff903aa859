use governor::{clock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::config::RateLimitConfig;

/// Token bucket guarding the control socket against command floods.
pub struct CommandRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    enabled: bool,
}

impl CommandRateLimiter {
    /// Zero rates are raised to one so a bad config cannot lock the socket.
    pub fn new(commands_per_second: u32, burst_capacity: u32, enabled: bool) -> Self {
        let quota = Quota::per_second(Self::at_least_one(commands_per_second, "commands_per_second"))
            .allow_burst(Self::at_least_one(burst_capacity, "burst_capacity"));

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

    /// Takes a token if one is available. Never waits.
    pub fn check(&self) -> bool {
        if !self.enabled {
            return true;
        }

        self.limiter.check().is_ok()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn at_least_one(value: u32, name: &str) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap_or_else(|| {
            tracing::warn!("rate_limit.{} is 0, using 1", name);
            NonZeroU32::MIN
        })
    }
}
