use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stale keys are swept after this many checks.
const PRUNE_EVERY: u64 = 4096;

/// A keyed GCRA limiter owned by whoever builds it. Two instances never share
/// buckets, so routers and app states built side by side stay independent.
pub struct KeyedLimiter<K: Hash + Eq + Clone> {
    inner: DefaultKeyedRateLimiter<K>,
    checks: AtomicU64,
}

impl<K: Hash + Eq + Clone> KeyedLimiter<K> {
    /// `None` when `per_second` is 0, meaning unlimited.
    pub fn per_second(per_second: u32) -> Option<Self> {
        NonZeroU32::new(per_second).map(|n| Self::with_quota(Quota::per_second(n)))
    }

    /// `None` when `per_minute` is 0, meaning unlimited.
    pub fn per_minute(per_minute: u32) -> Option<Self> {
        NonZeroU32::new(per_minute).map(|n| Self::with_quota(Quota::per_minute(n)))
    }

    fn with_quota(quota: Quota) -> Self {
        Self {
            inner: RateLimiter::keyed(quota),
            checks: AtomicU64::new(0),
        }
    }

    /// `Err` carries the milliseconds until the key may try again.
    pub fn check(&self, key: &K) -> Result<(), u64> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.inner.retain_recent();
            self.inner.shrink_to_fit();
        }
        self.inner.check_key(key).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            wait.as_millis().max(1) as u64
        })
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quota_means_unlimited() {
        assert!(KeyedLimiter::<u32>::per_second(0).is_none());
        assert!(KeyedLimiter::<u32>::per_minute(0).is_none());
    }

    #[test]
    fn burst_beyond_quota_is_refused_with_a_wait() {
        let limiter = KeyedLimiter::per_second(2).unwrap();
        assert!(limiter.check(&"a").is_ok());
        assert!(limiter.check(&"a").is_ok());
        let wait = limiter.check(&"a").unwrap_err();
        assert!(wait >= 1 && wait <= 1000, "wait was {wait}ms");
        // Other keys keep their own budget.
        assert!(limiter.check(&"b").is_ok());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn separate_limiters_do_not_share_buckets() {
        let first = KeyedLimiter::per_minute(1).unwrap();
        let second = KeyedLimiter::per_minute(1).unwrap();
        assert!(first.check(&7u32).is_ok());
        assert!(first.check(&7u32).is_err());
        assert!(second.check(&7u32).is_ok());
    }
}
