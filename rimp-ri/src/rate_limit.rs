//! Inbound rate limiting
//!
//! Process-wide token bucket in front of `POST /impute`. Owned by
//! `AppState` and injected into the handler.

use governor::{DefaultDirectRateLimiter, Quota};
use std::num::NonZeroU32;
use tracing::info;

pub struct RateLimiter {
    inner: Option<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    /// `requests_per_second = 0` disables limiting; `burst = 0` means
    /// burst equal to the rate
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let inner = NonZeroU32::new(requests_per_second).map(|rate| {
            let burst = NonZeroU32::new(burst).unwrap_or(rate);
            info!(
                requests_per_second = rate.get(),
                burst = burst.get(),
                "Rate limiting enabled"
            );
            governor::RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))
        });
        Self { inner }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Take one token; `false` when the bucket is empty
    pub fn check(&self) -> bool {
        match &self.inner {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }
}
