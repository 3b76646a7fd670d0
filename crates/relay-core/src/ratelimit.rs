//! Per-webhook rate limit tracking
//!
//! The platform's limiter is authoritative. This only remembers what the
//! last response said so a request that is certain to be rejected with a
//! 429 never leaves the process.

use reqwest::header::HeaderMap;
use relay_platform::Snowflake;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";
const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
const HEADER_RETRY_AFTER: &str = "retry-after";

/// Rate limit metadata reported by a single platform response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    /// Only set when the request itself was rejected
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let remaining = header_str(headers, HEADER_REMAINING).and_then(|v| v.parse().ok());

        let reset_after = header_secs(headers, HEADER_RESET_AFTER).or_else(|| {
            // Absolute epoch seconds, fractional with millisecond precision
            let reset = header_str(headers, HEADER_RESET)?.parse::<f64>().ok()?;
            let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
            secs(reset - now).or(Some(Duration::ZERO))
        });

        Self {
            remaining,
            reset_after,
            retry_after: header_secs(headers, HEADER_RETRY_AFTER),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.reset_after.is_none() && self.retry_after.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    remaining: u32,
    reset_at: Instant,
}

/// Shared across every executor; one bucket per webhook
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    buckets: Mutex<HashMap<Snowflake, Bucket>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-decrement. Never waits.
    pub fn try_acquire(&self, webhook: Snowflake) -> bool {
        self.try_acquire_at(webhook, Instant::now())
    }

    pub fn try_acquire_at(&self, webhook: Snowflake, now: Instant) -> bool {
        let mut buckets = self.lock();
        let Some(bucket) = buckets.get_mut(&webhook) else {
            return true;
        };

        if now >= bucket.reset_at {
            // Window rolled over, the next response tells us the new state
            buckets.remove(&webhook);
            return true;
        }

        if bucket.remaining > 0 {
            bucket.remaining -= 1;
            return true;
        }

        debug!(
            "Webhook {} has no requests left for another {:?}",
            webhook,
            bucket.reset_at - now
        );
        false
    }

    /// Overwrite local state with what the platform reported
    pub fn update(&self, webhook: Snowflake, info: &RateLimitInfo) {
        self.update_at(webhook, info, Instant::now())
    }

    pub fn update_at(&self, webhook: Snowflake, info: &RateLimitInfo, now: Instant) {
        let bucket = match (info.retry_after, info.remaining, info.reset_after) {
            (Some(retry_after), _, _) => Bucket {
                remaining: 0,
                reset_at: now + retry_after,
            },
            (None, Some(remaining), Some(reset_after)) => Bucket {
                remaining,
                reset_at: now + reset_after,
            },
            _ => return,
        };

        self.lock().insert(webhook, bucket);
    }

    /// Time until the current window for `webhook` resets, if it is exhausted
    pub fn retry_after(&self, webhook: Snowflake) -> Option<Duration> {
        self.retry_after_at(webhook, Instant::now())
    }

    pub fn retry_after_at(&self, webhook: Snowflake, now: Instant) -> Option<Duration> {
        let buckets = self.lock();
        let bucket = buckets.get(&webhook)?;
        (bucket.remaining == 0 && bucket.reset_at > now).then(|| bucket.reset_at - now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Snowflake, Bucket>> {
        // A panic mid-update can only leave a stale bucket behind
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn header_secs(headers: &HeaderMap, name: &str) -> Option<Duration> {
    secs(header_str(headers, name)?.trim().parse().ok()?)
}

pub(crate) fn secs(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}
