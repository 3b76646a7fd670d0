//! Proxy metrics sink
//!
//! Reporting is infallible so it can never turn a delivered message into a
//! failed one.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub trait ProxyMetrics: Send + Sync {
    /// A proxied message was delivered (primary request only)
    fn message_proxied(&self, latency: Duration);

    /// Any webhook execution response, including follow-up chunks
    fn webhook_response(&self, status: u16, latency: Duration);
}

/// In-process counters
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    messages_proxied: AtomicU64,
    proxy_latency_ms: AtomicU64,
    webhook_responses: AtomicU64,
    webhook_errors: AtomicU64,
    webhook_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_proxied: u64,
    pub webhook_responses: u64,
    pub webhook_errors: u64,
    pub avg_proxy_latency_ms: u64,
    pub avg_webhook_latency_ms: u64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let messages = self.messages_proxied.load(Ordering::Relaxed);
        let responses = self.webhook_responses.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_proxied: messages,
            webhook_responses: responses,
            webhook_errors: self.webhook_errors.load(Ordering::Relaxed),
            avg_proxy_latency_ms: average(self.proxy_latency_ms.load(Ordering::Relaxed), messages),
            avg_webhook_latency_ms: average(
                self.webhook_latency_ms.load(Ordering::Relaxed),
                responses,
            ),
        }
    }
}

impl ProxyMetrics for AtomicMetrics {
    fn message_proxied(&self, latency: Duration) {
        self.messages_proxied.fetch_add(1, Ordering::Relaxed);
        self.proxy_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    fn webhook_response(&self, status: u16, latency: Duration) {
        self.webhook_responses.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.webhook_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.webhook_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }
}

fn average(total: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        total / count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let metrics = AtomicMetrics::new();
        metrics.message_proxied(Duration::from_millis(100));
        metrics.message_proxied(Duration::from_millis(300));
        metrics.webhook_response(200, Duration::from_millis(50));
        metrics.webhook_response(429, Duration::from_millis(10));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_proxied, 2);
        assert_eq!(snapshot.avg_proxy_latency_ms, 200);
        assert_eq!(snapshot.webhook_responses, 2);
        assert_eq!(snapshot.webhook_errors, 1);
        assert_eq!(snapshot.avg_webhook_latency_ms, 30);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = AtomicMetrics::new().snapshot();
        assert_eq!(snapshot.messages_proxied, 0);
        assert_eq!(snapshot.avg_proxy_latency_ms, 0);
    }
}
