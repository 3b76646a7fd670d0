//! Webhook cache
//!
//! Maps a channel to the webhook the relay posts through. Lookups for
//! different channels never wait on each other; lookups for the same
//! channel are serialized so a cold channel only gets one webhook.

use async_trait::async_trait;
use relay_platform::{DiscordClient, PlatformError, Snowflake, Webhook};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Executable handle for a channel's webhook
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookHandle {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    token: Arc<str>,
}

impl WebhookHandle {
    pub fn new(id: Snowflake, channel_id: Snowflake, token: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            channel_id,
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for WebhookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandle")
            .field("id", &self.id)
            .field("channel_id", &self.channel_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Where webhooks come from when the cache misses
#[async_trait]
pub trait WebhookSource: Send + Sync {
    async fn channel_webhooks(&self, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError>;
    async fn create_webhook(&self, channel_id: Snowflake, name: &str) -> Result<Webhook, PlatformError>;
}

#[async_trait]
impl WebhookSource for DiscordClient {
    async fn channel_webhooks(&self, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
        DiscordClient::channel_webhooks(self, channel_id).await
    }

    async fn create_webhook(&self, channel_id: Snowflake, name: &str) -> Result<Webhook, PlatformError> {
        DiscordClient::create_webhook(self, channel_id, name).await
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<WebhookHandle>>>;

pub struct WebhookCache {
    source: Arc<dyn WebhookSource>,
    webhook_name: String,
    /// Bot user id; when known, only webhooks it created are reused
    owner: Option<Snowflake>,
    slots: Mutex<HashMap<Snowflake, Slot>>,
}

impl WebhookCache {
    pub fn new(
        source: Arc<dyn WebhookSource>,
        webhook_name: impl Into<String>,
        owner: Option<Snowflake>,
    ) -> Self {
        Self {
            source,
            webhook_name: webhook_name.into(),
            owner,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Cached webhook for the channel, or an existing/new one from the platform
    pub async fn get_webhook(&self, channel_id: Snowflake) -> Result<WebhookHandle, PlatformError> {
        let slot = self.slot(channel_id);
        let mut entry = slot.lock().await;

        if let Some(handle) = entry.as_ref() {
            return Ok(handle.clone());
        }

        let handle = self.find_or_create(channel_id, None).await?;
        *entry = Some(handle.clone());
        Ok(handle)
    }

    /// Drop `stale` and fetch a replacement.
    ///
    /// If another caller already replaced it, that replacement is returned
    /// instead of creating yet another webhook.
    pub async fn invalidate_and_refresh(
        &self,
        stale: &WebhookHandle,
    ) -> Result<WebhookHandle, PlatformError> {
        let slot = self.slot(stale.channel_id);
        let mut entry = slot.lock().await;

        if let Some(current) = entry.as_ref() {
            if current.id != stale.id {
                debug!(
                    "Webhook {} in channel {} was already refreshed to {}",
                    stale.id, stale.channel_id, current.id
                );
                return Ok(current.clone());
            }
        }

        *entry = None;
        let handle = self.find_or_create(stale.channel_id, Some(stale.id)).await?;
        *entry = Some(handle.clone());
        Ok(handle)
    }

    pub async fn cached(&self, channel_id: Snowflake) -> Option<WebhookHandle> {
        let slot = self.slot(channel_id);
        let entry = slot.lock().await;
        entry.clone()
    }

    fn slot(&self, channel_id: Snowflake) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(channel_id).or_default().clone()
    }

    async fn find_or_create(
        &self,
        channel_id: Snowflake,
        exclude: Option<Snowflake>,
    ) -> Result<WebhookHandle, PlatformError> {
        let existing = self
            .source
            .channel_webhooks(channel_id)
            .await?
            .into_iter()
            .find(|w| Some(w.id) != exclude && self.is_ours(w));

        let webhook = match existing {
            Some(webhook) => {
                debug!("Reusing webhook {} in channel {}", webhook.id, channel_id);
                webhook
            }
            None => {
                info!("Creating proxy webhook in channel {}", channel_id);
                self.source
                    .create_webhook(channel_id, &self.webhook_name)
                    .await?
            }
        };

        let token = webhook
            .token
            .ok_or(PlatformError::MissingToken(webhook.id))?;
        Ok(WebhookHandle::new(webhook.id, channel_id, token))
    }

    fn is_ours(&self, webhook: &Webhook) -> bool {
        webhook.is_incoming()
            && webhook.token.is_some()
            && webhook.name.as_deref() == Some(self.webhook_name.as_str())
            && self.owner.map_or(true, |owner| webhook.created_by(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_platform::User;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    const CHANNEL: Snowflake = Snowflake(100);
    const BOT: Snowflake = Snowflake(1);

    fn webhook(id: u64, name: &str, creator: u64) -> Webhook {
        Webhook {
            id: Snowflake(id),
            kind: 1,
            channel_id: Some(CHANNEL),
            name: Some(name.to_string()),
            token: Some(format!("token-{}", id)),
            user: Some(User {
                id: Snowflake(creator),
                username: "someone".to_string(),
            }),
        }
    }

    /// Serves a fixed listing and mints fresh ids on create
    struct FakeSource {
        existing: Mutex<Vec<Webhook>>,
        next_id: AtomicU64,
        lists: AtomicUsize,
        creates: AtomicUsize,
    }

    impl FakeSource {
        fn new(existing: Vec<Webhook>) -> Arc<Self> {
            Arc::new(Self {
                existing: Mutex::new(existing),
                next_id: AtomicU64::new(500),
                lists: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WebhookSource for FakeSource {
        async fn channel_webhooks(&self, _channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(self.existing.lock().unwrap().clone())
        }

        async fn create_webhook(&self, _channel_id: Snowflake, name: &str) -> Result<Webhook, PlatformError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            let created = webhook(self.next_id.fetch_add(1, Ordering::SeqCst), name, BOT.0);
            self.existing.lock().unwrap().push(created.clone());
            Ok(created)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl WebhookSource for FailingSource {
        async fn channel_webhooks(&self, _channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
            Err(PlatformError::Api {
                status: 403,
                code: Some(50013),
                message: "Missing Permissions".to_string(),
            })
        }

        async fn create_webhook(&self, _channel_id: Snowflake, _name: &str) -> Result<Webhook, PlatformError> {
            unreachable!("listing fails first")
        }
    }

    /// Holds the listing for one channel until released
    struct GatedSource {
        gated: Snowflake,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl WebhookSource for GatedSource {
        async fn channel_webhooks(&self, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
            if channel_id == self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(vec![])
        }

        async fn create_webhook(&self, channel_id: Snowflake, name: &str) -> Result<Webhook, PlatformError> {
            Ok(webhook(channel_id.0 + 1000, name, BOT.0))
        }
    }

    #[tokio::test]
    async fn test_reuses_own_webhook() {
        let source = FakeSource::new(vec![
            webhook(10, "Someone Else", 99),
            webhook(11, "Proxy", 99),
            webhook(12, "Proxy", BOT.0),
        ]);
        let cache = WebhookCache::new(source.clone(), "Proxy", Some(BOT));

        let handle = cache.get_webhook(CHANNEL).await.unwrap();
        assert_eq!(handle.id, Snowflake(12));
        assert_eq!(handle.token(), "token-12");
        assert_eq!(source.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_creates_when_missing_and_caches() {
        let source = FakeSource::new(vec![webhook(10, "Someone Else", 99)]);
        let cache = WebhookCache::new(source.clone(), "Proxy", Some(BOT));

        let first = cache.get_webhook(CHANNEL).await.unwrap();
        let second = cache.get_webhook(CHANNEL).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.id, Snowflake(500));
        assert_eq!(source.lists.load(Ordering::SeqCst), 1);
        assert_eq!(source.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_lookups_create_once() {
        let source = FakeSource::new(vec![]);
        let cache = Arc::new(WebhookCache::new(source.clone(), "Proxy", None));

        let lookups: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_webhook(CHANNEL).await.unwrap() })
            })
            .collect();

        let handles = futures::future::join_all(lookups).await;
        assert!(handles.iter().all(|h| h.as_ref().unwrap().id == Snowflake(500)));
        assert_eq!(source.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_channel_does_not_block_others() {
        let source = Arc::new(GatedSource {
            gated: CHANNEL,
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let cache = Arc::new(WebhookCache::new(source.clone(), "Proxy", None));

        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_webhook(CHANNEL).await }
        });
        source.entered.notified().await;

        let other = tokio::time::timeout(Duration::from_secs(1), cache.get_webhook(Snowflake(101)))
            .await
            .expect("lookup for another channel waited on the pending one")
            .unwrap();
        assert_eq!(other.channel_id, Snowflake(101));
        assert!(!pending.is_finished());

        source.release.notify_one();
        let first = pending.await.unwrap().unwrap();
        assert_eq!(first.channel_id, CHANNEL);
        assert_eq!(first.id, Snowflake(1100));
    }

    #[tokio::test]
    async fn test_invalidate_and_refresh_skips_stale() {
        let source = FakeSource::new(vec![webhook(12, "Proxy", BOT.0), webhook(13, "Proxy", BOT.0)]);
        let cache = WebhookCache::new(source.clone(), "Proxy", Some(BOT));

        let stale = cache.get_webhook(CHANNEL).await.unwrap();
        assert_eq!(stale.id, Snowflake(12));

        let fresh = cache.invalidate_and_refresh(&stale).await.unwrap();
        assert_eq!(fresh.id, Snowflake(13));
        assert_eq!(cache.cached(CHANNEL).await, Some(fresh));
    }

    #[tokio::test]
    async fn test_second_refresh_of_same_handle_is_coalesced() {
        let source = FakeSource::new(vec![webhook(12, "Proxy", BOT.0)]);
        let cache = WebhookCache::new(source.clone(), "Proxy", Some(BOT));

        let stale = cache.get_webhook(CHANNEL).await.unwrap();
        let first = cache.invalidate_and_refresh(&stale).await.unwrap();
        let second = cache.invalidate_and_refresh(&stale).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let cache = WebhookCache::new(Arc::new(FailingSource), "Proxy", None);
        let err = cache.get_webhook(CHANNEL).await.unwrap_err();
        assert!(matches!(err, PlatformError::Api { status: 403, .. }));
        assert!(cache.cached(CHANNEL).await.is_none());
    }

    #[test]
    fn test_handle_debug_redacts_token() {
        let handle = WebhookHandle::new(Snowflake(1), CHANNEL, "very-secret");
        assert!(!format!("{:?}", handle).contains("very-secret"));
    }
}
