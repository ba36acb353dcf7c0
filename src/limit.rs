//! Request rate limiting for the user-facing confirmation flows.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota};
use thiserror::Error;
use tracing::debug;

/// Tracked keys above which idle keys are evicted on the next check.
const RETAIN_THRESHOLD: usize = 10_000;

/// Failure of the limiter itself, as opposed to a denial.
#[derive(Debug, Error)]
#[error("rate limiter unavailable: {0}")]
pub struct LimiterError(pub String);

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `Ok(false)` means `key` has used up its quota for now.
    async fn allow(&self, key: &str) -> Result<bool, LimiterError>;
}

/// Per-key limiter allowing `limit` requests in a burst, refilled evenly
/// over `window`.
pub struct KeyedLimiter {
    governor: DefaultKeyedRateLimiter<String>,
}

impl KeyedLimiter {
    /// `None` when `limit` is zero or `window` is too short to split into
    /// `limit` periods.
    pub fn new(limit: u32, window: Duration) -> Option<Self> {
        let burst = NonZeroU32::new(limit)?;
        let quota = Quota::with_period(window / limit)?.allow_burst(burst);
        Some(Self {
            governor: governor::RateLimiter::keyed(quota),
        })
    }

    pub fn tracked_keys(&self) -> usize {
        self.governor.len()
    }

    /// Forget keys whose quota has fully refilled.
    pub fn evict_idle(&self) {
        self.governor.retain_recent();
        self.governor.shrink_to_fit();
    }
}

#[async_trait]
impl RateLimiter for KeyedLimiter {
    async fn allow(&self, key: &str) -> Result<bool, LimiterError> {
        if self.governor.len() >= RETAIN_THRESHOLD {
            debug!(keys = self.governor.len(), "evicting idle rate limit keys");
            self.evict_idle();
        }
        Ok(self.governor.check_key(&key.to_string()).is_ok())
    }
}

/// Limiter that lets everything through.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn allow(&self, _key: &str) -> Result<bool, LimiterError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_after_burst() {
        let limiter = KeyedLimiter::new(2, Duration::from_secs(60)).unwrap();

        assert!(limiter.allow("u1").await.unwrap());
        assert!(limiter.allow("u1").await.unwrap());
        assert!(!limiter.allow("u1").await.unwrap());

        // other keys have their own quota
        assert!(limiter.allow("u2").await.unwrap());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn zero_quota_is_rejected() {
        assert!(KeyedLimiter::new(0, Duration::from_secs(60)).is_none());
        assert!(KeyedLimiter::new(5, Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn idle_keys_are_evicted() {
        let limiter = KeyedLimiter::new(1, Duration::from_millis(1)).unwrap();
        for n in 0..5 {
            assert!(limiter.allow(&format!("donation:d{n}")).await.unwrap());
        }
        assert_eq!(limiter.tracked_keys(), 5);

        std::thread::sleep(Duration::from_millis(20));
        limiter.evict_idle();

        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn unlimited_always_allows() {
        assert!(Unlimited.allow("k").await.unwrap());
    }
}
