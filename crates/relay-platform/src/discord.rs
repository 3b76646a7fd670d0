//! Discord REST API client
//!
//! Only the bot-authenticated endpoints the relay needs to manage its own
//! webhooks live here:
//! - Current bot identity
//! - Listing a channel's webhooks
//! - Creating a webhook in a channel
//!
//! Webhook *execution* is token-authenticated and handled by the executor in
//! `relay-core`, which borrows this client's connection pool.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::snowflake::Snowflake;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Webhook type that can be executed with its token
pub const WEBHOOK_TYPE_INCOMING: u8 = 1;

/// JSON error code: the webhook id/token no longer exists
pub const ERROR_UNKNOWN_WEBHOOK: u32 = 10015;
/// JSON error code: request entity too large
pub const ERROR_ENTITY_TOO_LARGE: u32 = 40005;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} (code {code:?}) - {message}")]
    Api {
        status: u16,
        code: Option<u32>,
        message: String,
    },
    #[error("webhook {0} has no execution token")]
    MissingToken(Snowflake),
}

#[derive(Clone)]
pub struct DiscordClient {
    client: reqwest::Client,
    api_base: Arc<String>,
    token: Arc<String>,
}

impl DiscordClient {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .user_agent(concat!("hookrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let api_base: String = api_base.into();
        Ok(Self {
            client,
            api_base: Arc::new(api_base.trim_end_matches('/').to_string()),
            token: Arc::new(token.into()),
        })
    }

    /// Underlying HTTP client, shared so webhook executions reuse the pool
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Execution endpoint for a webhook. Contains the secret token, never log it.
    pub fn webhook_url(&self, id: Snowflake, token: &str) -> String {
        format!("{}/webhooks/{}/{}", self.api_base, id, token)
    }

    /// Fetch the bot's own user
    pub async fn current_user(&self) -> Result<User, PlatformError> {
        let url = format!("{}/users/@me", self.api_base);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = check_status(response).await?;

        Ok(response.json().await?)
    }

    /// List every webhook in a channel
    pub async fn channel_webhooks(&self, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
        let url = format!("{}/channels/{}/webhooks", self.api_base, channel_id);
        debug!("Listing webhooks in channel {}", channel_id);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = check_status(response).await?;

        Ok(response.json().await?)
    }

    /// Create an incoming webhook in a channel
    pub async fn create_webhook(
        &self,
        channel_id: Snowflake,
        name: &str,
    ) -> Result<Webhook, PlatformError> {
        let url = format!("{}/channels/{}/webhooks", self.api_base, channel_id);

        let response = self
            .authorized(self.client.post(&url))
            .json(&CreateWebhook { name })
            .send()
            .await?;
        let response = check_status(response).await?;

        let webhook: Webhook = response.json().await?;
        info!("Created webhook {} in channel {}", webhook.id, channel_id);
        Ok(webhook)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Authorization", format!("Bot {}", self.token))
            .header("Accept", "application/json")
    }
}

impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_base", &self.api_base)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ApiErrorBody>(&text).ok();
    Err(PlatformError::Api {
        status: status.as_u16(),
        code: body.as_ref().and_then(|b| b.code),
        message: body.and_then(|b| b.message).unwrap_or(text),
    })
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
struct CreateWebhook<'a> {
    name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
}

#[derive(Clone, Deserialize)]
pub struct Webhook {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    pub channel_id: Option<Snowflake>,
    pub name: Option<String>,
    pub token: Option<String>,
    /// The user that created this webhook
    pub user: Option<User>,
}

impl Webhook {
    pub fn is_incoming(&self) -> bool {
        self.kind == WEBHOOK_TYPE_INCOMING
    }

    pub fn created_by(&self, user_id: Snowflake) -> bool {
        self.user.as_ref().is_some_and(|u| u.id == user_id)
    }
}

impl std::fmt::Debug for Webhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webhook")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("channel_id", &self.channel_id)
            .field("name", &self.name)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("user", &self.user)
            .finish()
    }
}

/// Error payload returned alongside non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: Option<u32>,
    pub message: Option<String>,
    /// Seconds, only present on 429 responses
    pub retry_after: Option<f64>,
}
