//! Webhook executor
//!
//! Turns one proxied message into webhook executions:
//! 1. Split attachments into upload-sized chunks (fails before any request)
//! 2. Post content + first chunk and wait for the created message
//! 3. On "unknown webhook", refresh the cached webhook and try once more
//! 4. Post remaining chunks in the background; their failures are only logged
//!
//! Rate limit state is consulted right before the primary request and
//! updated from every response.

use futures::future::try_join_all;
use relay_platform::{
    ApiErrorBody, DiscordClient, PlatformError, Snowflake, ERROR_ENTITY_TOO_LARGE,
    ERROR_UNKNOWN_WEBHOOK,
};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{WebhookCache, WebhookHandle};
use crate::chunker::{chunk_attachments, Attachment, AttachmentTooLarge, DEFAULT_UPLOAD_LIMIT};
use crate::metrics::ProxyMetrics;
use crate::ratelimit::{secs, RateLimitInfo, RateLimitTracker};
use crate::sanitize::NameSanitizer;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("rate limited by the platform")]
    RateLimited { retry_after: Option<Duration> },
    #[error("platform server error (HTTP {status})")]
    PlatformServerError { status: u16 },
    #[error("platform rejected the request: HTTP {status} (code {code:?}) - {message}")]
    PlatformClientError {
        status: u16,
        code: Option<u32>,
        message: String,
    },
    #[error("unparseable platform response (HTTP {status})")]
    MalformedPlatformResponse { status: u16 },
    #[error("attachment exceeds the upload size limit")]
    AttachmentTooLarge(#[source] Option<AttachmentTooLarge>),
    #[error("no webhook available for the channel: {0}")]
    WebhookUnavailable(#[source] PlatformError),
    #[error("failed to fetch attachment {url}: {source}")]
    AttachmentFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl ExecuteError {
    /// Execution URLs embed the webhook token, so it is stripped before the error can be shown
    fn transport(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url())
    }
}

impl From<AttachmentTooLarge> for ExecuteError {
    fn from(err: AttachmentTooLarge) -> Self {
        Self::AttachmentTooLarge(Some(err))
    }
}

/// A message to post as a persona
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    pub channel_id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Platform hard limits
#[derive(Debug, Clone)]
pub struct ExecutorLimits {
    pub max_upload_bytes: u64,
    pub max_content_length: usize,
    pub max_username_length: usize,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_UPLOAD_LIMIT,
            max_content_length: 2000,
            max_username_length: 80,
        }
    }
}

/// Sanitized and truncated fields, reused across attempts
#[derive(Debug, Clone)]
struct Persona {
    username: String,
    avatar_url: Option<String>,
}

enum PrimaryOutcome {
    Sent(Snowflake),
    UnknownWebhook { status: u16 },
}

pub struct WebhookExecutor {
    discord: DiscordClient,
    cache: Arc<WebhookCache>,
    rate_limits: Arc<RateLimitTracker>,
    sanitizer: NameSanitizer,
    metrics: Arc<dyn ProxyMetrics>,
    limits: ExecutorLimits,
}

impl WebhookExecutor {
    pub fn new(
        discord: DiscordClient,
        cache: Arc<WebhookCache>,
        rate_limits: Arc<RateLimitTracker>,
        sanitizer: NameSanitizer,
        metrics: Arc<dyn ProxyMetrics>,
        limits: ExecutorLimits,
    ) -> Self {
        Self {
            discord,
            cache,
            rate_limits,
            sanitizer,
            metrics,
            limits,
        }
    }

    /// Post a message through the channel's webhook, returning the new message id
    pub async fn execute(&self, request: &ProxyRequest) -> Result<Snowflake, ExecuteError> {
        debug!("Invoking webhook in channel {}", request.channel_id);
        let started = Instant::now();

        let mut chunks = chunk_attachments(&request.attachments, self.limits.max_upload_bytes)?;
        if !chunks.is_empty() {
            info!(
                "Invoking webhook with {} attachments totalling {} MiB in {} chunks",
                request.attachments.len(),
                request.attachments.iter().map(|a| a.size).sum::<u64>() / MIB,
                chunks.len()
            );
        }

        let persona = Persona {
            username: truncate(
                &self.sanitizer.sanitize(&request.username),
                self.limits.max_username_length,
            ),
            avatar_url: request.avatar_url.clone(),
        };
        let content = truncate(&request.content, self.limits.max_content_length);
        let first_chunk = if chunks.is_empty() {
            Vec::new()
        } else {
            chunks.remove(0)
        };

        let mut webhook = self
            .cache
            .get_webhook(request.channel_id)
            .await
            .map_err(ExecuteError::WebhookUnavailable)?;
        let mut refreshed = false;

        let message_id = loop {
            match self
                .send_primary(&webhook, &persona, &content, &first_chunk)
                .await?
            {
                PrimaryOutcome::Sent(id) => break id,
                PrimaryOutcome::UnknownWebhook { status } if refreshed => {
                    return Err(ExecuteError::PlatformServerError { status });
                }
                PrimaryOutcome::UnknownWebhook { .. } => {
                    warn!(
                        "Webhook {} in channel {} no longer exists, refreshing",
                        webhook.id, webhook.channel_id
                    );
                    webhook = self
                        .cache
                        .invalidate_and_refresh(&webhook)
                        .await
                        .map_err(ExecuteError::WebhookUnavailable)?;
                    refreshed = true;
                }
            }
        };

        if !chunks.is_empty() {
            self.dispatch_follow_ups(webhook.clone(), persona, chunks);
        }

        self.metrics.message_proxied(started.elapsed());
        info!(
            "Invoked webhook {} in channel {}",
            webhook.id, webhook.channel_id
        );
        Ok(message_id)
    }

    async fn send_primary(
        &self,
        webhook: &WebhookHandle,
        persona: &Persona,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<PrimaryOutcome, ExecuteError> {
        let form = persona_form(persona).text("content", content.to_string());
        let form = add_attachments(self.discord.http(), form, attachments).await?;

        // As close to the send as possible to keep the check/send window small
        if !self.rate_limits.try_acquire(webhook.id) {
            debug!("Refusing to invoke rate limited webhook {}", webhook.id);
            return Err(ExecuteError::RateLimited {
                retry_after: self.rate_limits.retry_after(webhook.id),
            });
        }

        let request_started = Instant::now();
        let response = self
            .discord
            .http()
            .post(self.discord.webhook_url(webhook.id, webhook.token()))
            .query(&[("wait", "true")])
            .header("X-RateLimit-Precision", "millisecond")
            .multipart(form)
            .send()
            .await
            .map_err(ExecuteError::transport)?;

        let status = response.status();
        self.metrics
            .webhook_response(status.as_u16(), request_started.elapsed());
        let mut limits = RateLimitInfo::from_headers(response.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            if limits.retry_after.is_none() {
                let body = response.text().await.unwrap_or_default();
                limits.retry_after = serde_json::from_str::<ApiErrorBody>(&body)
                    .ok()
                    .and_then(|b| b.retry_after)
                    .and_then(secs);
            }
            self.rate_limits.update(webhook.id, &limits);
            return Err(ExecuteError::RateLimited {
                retry_after: limits.retry_after,
            });
        }
        self.rate_limits.update(webhook.id, &limits);

        let body = response.text().await.map_err(ExecuteError::transport)?;
        let json: Value = serde_json::from_str(&body).map_err(|_| {
            ExecuteError::MalformedPlatformResponse {
                status: status.as_u16(),
            }
        })?;

        interpret_response(status, &json)
    }

    /// Fire-and-forget: the message is already visible, so nothing here can fail it
    fn dispatch_follow_ups(
        &self,
        webhook: WebhookHandle,
        persona: Persona,
        chunks: Vec<Vec<Attachment>>,
    ) {
        let discord = self.discord.clone();
        let rate_limits = self.rate_limits.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            for (index, chunk) in chunks.iter().enumerate() {
                let result =
                    send_follow_up(&discord, &rate_limits, metrics.as_ref(), &webhook, &persona, chunk)
                        .await;
                if let Err(e) = result {
                    // Chunk 1 went with the primary request
                    warn!(
                        "Failed to send attachment chunk {} via webhook {}: {}",
                        index + 2,
                        webhook.id,
                        e
                    );
                }
            }
        });
    }
}

async fn send_follow_up(
    discord: &DiscordClient,
    rate_limits: &RateLimitTracker,
    metrics: &dyn ProxyMetrics,
    webhook: &WebhookHandle,
    persona: &Persona,
    attachments: &[Attachment],
) -> Result<(), ExecuteError> {
    // No content and no `wait`: these only carry the leftover files
    let form = add_attachments(discord.http(), persona_form(persona), attachments).await?;

    let started = Instant::now();
    let response = discord
        .http()
        .post(discord.webhook_url(webhook.id, webhook.token()))
        .header("X-RateLimit-Precision", "millisecond")
        .multipart(form)
        .send()
        .await
        .map_err(ExecuteError::transport)?;

    let status = response.status();
    metrics.webhook_response(status.as_u16(), started.elapsed());
    rate_limits.update(webhook.id, &RateLimitInfo::from_headers(response.headers()));

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ExecuteError::RateLimited { retry_after: None });
    }
    if status.is_server_error() {
        return Err(ExecuteError::PlatformServerError {
            status: status.as_u16(),
        });
    }
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ApiErrorBody>(&body).ok();
        return Err(ExecuteError::PlatformClientError {
            status: status.as_u16(),
            code: parsed.as_ref().and_then(|b| b.code),
            message: parsed.and_then(|b| b.message).unwrap_or(body),
        });
    }
    Ok(())
}

fn interpret_response(status: StatusCode, body: &Value) -> Result<PrimaryOutcome, ExecuteError> {
    let code = body
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c).ok());

    match code {
        Some(ERROR_UNKNOWN_WEBHOOK) => {
            return Ok(PrimaryOutcome::UnknownWebhook {
                status: status.as_u16(),
            })
        }
        // The chunker should have caught this already
        Some(ERROR_ENTITY_TOO_LARGE) => return Err(ExecuteError::AttachmentTooLarge(None)),
        _ => {}
    }

    if status.is_server_error() {
        return Err(ExecuteError::PlatformServerError {
            status: status.as_u16(),
        });
    }

    if status.is_client_error() {
        return Err(ExecuteError::PlatformClientError {
            status: status.as_u16(),
            code,
            message: body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }

    body.get("id")
        .and_then(|id| serde_json::from_value::<Snowflake>(id.clone()).ok())
        .map(PrimaryOutcome::Sent)
        .ok_or(ExecuteError::PlatformServerError {
            status: status.as_u16(),
        })
}

fn persona_form(persona: &Persona) -> Form {
    let form = Form::new().text("username", persona.username.clone());
    match &persona.avatar_url {
        Some(avatar_url) => form.text("avatar_url", avatar_url.clone()),
        None => form,
    }
}

/// Start every download at once, then stream each body into a `fileN` part
async fn add_attachments(
    http: &reqwest::Client,
    mut form: Form,
    attachments: &[Attachment],
) -> Result<Form, ExecuteError> {
    let responses = try_join_all(attachments.iter().map(|a| fetch_attachment(http, a))).await?;

    for (index, (attachment, response)) in attachments.iter().zip(responses).enumerate() {
        let length = response.content_length();
        let body = reqwest::Body::wrap_stream(response.bytes_stream());
        let part = match length {
            Some(length) => Part::stream_with_length(body, length),
            None => Part::stream(body),
        };
        form = form.part(
            format!("file{}", index),
            part.file_name(attachment.filename.clone()),
        );
    }

    Ok(form)
}

async fn fetch_attachment(
    http: &reqwest::Client,
    attachment: &Attachment,
) -> Result<reqwest::Response, ExecuteError> {
    http.get(&attachment.url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|source| ExecuteError::AttachmentFetch {
            url: attachment.url.clone(),
            source,
        })
}

/// Cut to `max` characters, ending in an ellipsis when anything was dropped
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }

    let mut truncated: String = text.chars().take(max - 1).collect();
    truncated.push('…');
    truncated
}
