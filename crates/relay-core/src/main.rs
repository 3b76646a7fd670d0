use anyhow::Result;
use relay_core::server::{router, AppState};
use relay_core::{
    AtomicMetrics, Config, NameSanitizer, RateLimitTracker, WebhookCache, WebhookExecutor,
};
use relay_platform::DiscordClient;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "relay_core=debug,relay_platform=info,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Webhook relay starting up...");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Configuration loaded");
    info!("  Platform API: {}", config.discord_api_url);
    info!("  Webhook name: {}", config.webhook_name);
    info!("  Upload limit: {} bytes", config.max_upload_bytes);

    let discord = DiscordClient::new(
        config.discord_api_url.clone(),
        config.discord_token.clone(),
        Some(config.http_timeout),
    )?;

    // Without our own id any webhook with the right name is reused
    let owner = match discord.current_user().await {
        Ok(user) => {
            info!("Authenticated as {} ({})", user.username, user.id);
            Some(user.id)
        }
        Err(e) => {
            warn!("Could not fetch bot user, webhook ownership won't be checked: {}", e);
            None
        }
    };

    let cache = Arc::new(WebhookCache::new(
        Arc::new(discord.clone()),
        config.webhook_name.clone(),
        owner,
    ));
    let metrics = Arc::new(AtomicMetrics::new());
    let executor = WebhookExecutor::new(
        discord,
        cache,
        Arc::new(RateLimitTracker::new()),
        NameSanitizer::new(config.sanitize_words.as_slice())?,
        metrics.clone(),
        config.executor_limits(),
    );

    let app = router(AppState {
        executor: Arc::new(executor),
        metrics,
    });

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
