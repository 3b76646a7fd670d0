use anyhow::{Context, Result};
use std::time::Duration;

use crate::chunker::DEFAULT_UPLOAD_LIMIT;
use crate::executor::ExecutorLimits;
use crate::sanitize::DEFAULT_TRIGGER_WORDS;

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub discord_api_url: String,

    /// Name given to webhooks the relay creates, and used to recognize them
    pub webhook_name: String,

    pub max_upload_bytes: u64,
    pub max_content_length: usize,
    pub max_username_length: usize,

    /// Words the platform refuses in webhook usernames
    pub sanitize_words: Vec<String>,

    pub http_timeout: Duration,
    pub http_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't have to touch the process env
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN must be set")?,
            discord_api_url: var("DISCORD_API_URL", relay_platform::DISCORD_API_BASE),

            webhook_name: var("PROXY_WEBHOOK_NAME", "PluralKit Proxy Webhook"),

            max_upload_bytes: var("MAX_UPLOAD_BYTES", &DEFAULT_UPLOAD_LIMIT.to_string())
                .parse()
                .context("MAX_UPLOAD_BYTES must be a byte count")?,
            max_content_length: var("MAX_CONTENT_LENGTH", "2000")
                .parse()
                .context("MAX_CONTENT_LENGTH must be a number")?,
            max_username_length: var("MAX_USERNAME_LENGTH", "80")
                .parse()
                .context("MAX_USERNAME_LENGTH must be a number")?,

            sanitize_words: lookup("SANITIZE_WORDS")
                .map(|s| {
                    s.split(',')
                        .map(|w| w.trim().to_string())
                        .filter(|w| !w.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| DEFAULT_TRIGGER_WORDS.iter().map(|w| w.to_string()).collect()),

            http_timeout: Duration::from_secs(
                var("HTTP_TIMEOUT_SECS", "30")
                    .parse()
                    .context("HTTP_TIMEOUT_SECS must be a number")?,
            ),
            http_port: var("HTTP_PORT", "3000")
                .parse()
                .context("HTTP_PORT must be a valid port number")?,
        })
    }

    pub fn executor_limits(&self) -> ExecutorLimits {
        ExecutorLimits {
            max_upload_bytes: self.max_upload_bytes,
            max_content_length: self.max_content_length,
            max_username_length: self.max_username_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DISCORD_TOKEN", "abc")]).unwrap();
        assert_eq!(config.discord_api_url, "https://discord.com/api/v10");
        assert_eq!(config.max_upload_bytes, 8 * 1024 * 1024);
        assert_eq!(config.max_content_length, 2000);
        assert_eq!(config.max_username_length, 80);
        assert_eq!(config.sanitize_words, vec!["clyde", "discord"]);
        assert_eq!(config.http_port, 3000);
    }

    #[test]
    fn test_token_required() {
        tokio_test::assert_err!(config(&[]));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DISCORD_TOKEN", "abc"),
            ("MAX_UPLOAD_BYTES", "26214400"),
            ("SANITIZE_WORDS", "clyde, ,wumpus"),
            ("HTTP_PORT", "8081"),
        ])
        .unwrap();
        assert_eq!(config.executor_limits().max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.sanitize_words, vec!["clyde", "wumpus"]);
        assert_eq!(config.http_port, 8081);
    }

    #[test]
    fn test_bad_port_is_an_error() {
        tokio_test::assert_err!(config(&[("DISCORD_TOKEN", "abc"), ("HTTP_PORT", "nope")]));
        tokio_test::assert_ok!(config(&[("DISCORD_TOKEN", "abc"), ("HTTP_PORT", "65535")]));
    }

    #[test]
    fn test_bad_timeout_is_an_error() {
        tokio_test::assert_err!(config(&[("DISCORD_TOKEN", "abc"), ("HTTP_TIMEOUT_SECS", "soon")]));
        let config = config(&[("DISCORD_TOKEN", "abc"), ("HTTP_TIMEOUT_SECS", "5")]).unwrap();
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }
}
