//! Configuration module for environment variable parsing.
//!
//! The channel name comes from the first positional argument (falling back to
//! the `CHANNEL` variable); everything else is environment-sourced. Missing or
//! invalid required values are fatal at startup.

use std::env;

use tracing::warn;
use url::Url;

use crate::error::ConfigError;

/// Application configuration resolved at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Channel to LISTEN on.
    pub channel: String,

    /// Destination for notification payloads.
    pub webhook_url: Url,

    /// Parsed Postgres connection parameters (from `DATABASE_URL`).
    pub pg: tokio_postgres::Config,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Reconnect backoff delay range in milliseconds (base, cap)
    pub reconnect_delay_ms: (u64, u64),

    /// Capacity of the bounded notification queue between the transport
    /// driver and the forward loop.
    pub queue_capacity: usize,
}

impl Config {
    /// Load configuration from the channel argument and environment variables.
    pub fn from_env(channel_arg: Option<String>) -> Result<Config, ConfigError> {
        let channel = channel_arg
            .or_else(|| env::var("CHANNEL").ok())
            .filter(|c| !c.trim().is_empty())
            .ok_or(ConfigError::MissingChannel)?;

        let webhook_url = env::var("WEBHOOK_URL")
            .map_err(|_| ConfigError::MissingWebhookUrl)
            .and_then(|raw| parse_webhook_url(&raw))?;

        let pg = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingDatabaseUrl)?
            .parse::<tokio_postgres::Config>()
            .map_err(ConfigError::InvalidDatabaseUrl)?;

        Ok(Config {
            channel,
            webhook_url,
            pg,

            request_timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),

            reconnect_delay_ms: parse_range("RECONNECT_DELAY_RANGE_MS", (500, 30_000)),

            queue_capacity: env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&c| c > 0)
                .unwrap_or(256),
        })
    }
}

/// Validate a webhook destination. Only http and https are accepted.
fn parse_webhook_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidWebhookUrl {
        url: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::UnsupportedWebhookScheme {
            scheme: scheme.to_string(),
        }),
    }
}

/// Parse a comma-separated range like "500,30000" into a tuple.
fn parse_range(name: &str, default: (u64, u64)) -> (u64, u64) {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 2 {
        warn!(env_var = name, value = %raw, "Invalid range format, using default");
        return default;
    }

    let min = parts[0].trim().parse::<u64>();
    let max = parts[1].trim().parse::<u64>();

    match (min, max) {
        (Ok(min), Ok(max)) if min <= max => (min, max),
        _ => {
            warn!(env_var = name, value = %raw, "Invalid range values, using default");
            default
        }
    }
}
