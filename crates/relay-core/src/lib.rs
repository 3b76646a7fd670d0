//! Relay Core Library
//!
//! Posts proxied messages through per-channel webhooks while respecting
//! platform rate limits and upload size limits.

pub mod cache;
pub mod chunker;
pub mod config;
pub mod executor;
pub mod metrics;
pub mod ratelimit;
pub mod sanitize;
pub mod server;

// Re-export key types for convenience
pub use cache::{WebhookCache, WebhookHandle, WebhookSource};
pub use chunker::{chunk_attachments, Attachment, AttachmentTooLarge};
pub use config::Config;
pub use executor::{ExecuteError, ExecutorLimits, ProxyRequest, WebhookExecutor};
pub use metrics::{AtomicMetrics, ProxyMetrics};
pub use ratelimit::{RateLimitInfo, RateLimitTracker};
pub use sanitize::NameSanitizer;
