//! Per-key token-bucket rate limiting.
//!
//! One bucket per API key, created lazily on first use and held in a
//! `DashMap` so buckets for different keys never contend. State is
//! process-local; no cross-process coordination is attempted.
//!
//! Refill math runs on an explicit `Instant` so tests drive time directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long an untouched bucket survives before eviction reclaims it.
pub const IDLE_EVICTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    /// Rejected; retry after this many whole seconds
    /// (`ceil(missing_tokens / rps)`).
    Reject { retry_after_secs: u64 },
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    rps: f64,
    burst: f64,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32, enabled: bool) -> Self {
        Self {
            buckets: DashMap::new(),
            rps: f64::from(rps.max(1)),
            burst: f64::from(burst.max(1)),
            enabled,
        }
    }

    /// Decide for one request. Non-blocking; buckets are independent.
    pub fn allow(&self, key: &str) -> Decision {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> Decision {
        if !self.enabled {
            return Decision::Accept;
        }

        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.burst,
            last_refill: now,
            last_used: now,
        });

        // Refill from elapsed time, capped at burst. saturating_duration_since
        // guards against an `allow_at` called with an older instant.
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last_refill = now;
        bucket.last_used = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Accept
        } else {
            let missing = 1.0 - bucket.tokens;
            Decision::Reject {
                retry_after_secs: (missing / self.rps).ceil() as u64,
            }
        }
    }

    /// Drop buckets idle longer than `max_idle`. Returns how many were
    /// reclaimed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(max_idle, Instant::now())
    }

    fn evict_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_used) < max_idle);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            debug!(evicted, "rate-limit buckets evicted");
        }
        evicted
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Periodic idle eviction until the shutdown channel flips.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.evict_idle(IDLE_EVICTION);
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject_with_retry_after() {
        let rl = RateLimiter::new(1, 3, true);
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(rl.allow_at("k", now), Decision::Accept);
        }
        match rl.allow_at("k", now) {
            Decision::Reject { retry_after_secs } => assert!(retry_after_secs >= 1),
            Decision::Accept => panic!("request past burst must be rejected"),
        }
    }

    #[test]
    fn refill_restores_capacity_over_time() {
        let rl = RateLimiter::new(10, 10, true);
        let t0 = Instant::now();

        for _ in 0..10 {
            assert_eq!(rl.allow_at("k", t0), Decision::Accept);
        }
        assert!(matches!(rl.allow_at("k", t0), Decision::Reject { .. }));

        // 500 ms at 10 rps refills 5 tokens (minus the one the reject probe
        // never took).
        let t1 = t0 + Duration::from_millis(500);
        for _ in 0..5 {
            assert_eq!(rl.allow_at("k", t1), Decision::Accept);
        }
        assert!(matches!(rl.allow_at("k", t1), Decision::Reject { .. }));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let rl = RateLimiter::new(100, 5, true);
        let t0 = Instant::now();
        assert_eq!(rl.allow_at("k", t0), Decision::Accept);

        let t1 = t0 + Duration::from_secs(3600);
        for _ in 0..5 {
            assert_eq!(rl.allow_at("k", t1), Decision::Accept);
        }
        assert!(matches!(rl.allow_at("k", t1), Decision::Reject { .. }));
    }

    #[test]
    fn retry_after_is_ceiling_of_missing_over_rps() {
        // rps = 1: an empty bucket needs one whole second.
        let rl = RateLimiter::new(1, 1, true);
        let now = Instant::now();
        assert_eq!(rl.allow_at("k", now), Decision::Accept);
        assert_eq!(
            rl.allow_at("k", now),
            Decision::Reject { retry_after_secs: 1 }
        );
    }

    #[test]
    fn keys_get_independent_buckets() {
        let rl = RateLimiter::new(1, 1, true);
        let now = Instant::now();
        assert_eq!(rl.allow_at("a", now), Decision::Accept);
        assert_eq!(rl.allow_at("b", now), Decision::Accept);
        assert!(matches!(rl.allow_at("a", now), Decision::Reject { .. }));
        assert_eq!(rl.bucket_count(), 2);
    }

    #[test]
    fn disabled_mode_always_accepts() {
        let rl = RateLimiter::new(1, 1, false);
        let now = Instant::now();
        for _ in 0..100 {
            assert_eq!(rl.allow_at("k", now), Decision::Accept);
        }
        assert_eq!(rl.bucket_count(), 0, "disabled mode allocates nothing");
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let rl = RateLimiter::new(10, 10, true);
        let t0 = Instant::now();
        rl.allow_at("stale", t0);
        rl.allow_at("fresh", t0 + Duration::from_secs(590));

        let evicted = rl.evict_idle_at(IDLE_EVICTION, t0 + Duration::from_secs(601));
        assert_eq!(evicted, 1);
        assert_eq!(rl.bucket_count(), 1);
    }
}
