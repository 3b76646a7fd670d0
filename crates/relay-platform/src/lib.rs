//! Relay Platform - typed access to the chat platform's REST API
//!
//! - discord: bot-authenticated client for webhook management
//! - snowflake: platform object ids

pub mod discord;
pub mod snowflake;

pub use discord::{
    ApiErrorBody, DiscordClient, PlatformError, User, Webhook, DISCORD_API_BASE,
    ERROR_ENTITY_TOO_LARGE, ERROR_UNKNOWN_WEBHOOK,
};
pub use snowflake::Snowflake;
