//! Error types for the relay.
//!
//! Startup-time problems (bad configuration, unreachable transport) are fatal
//! and surface as typed errors. Per-notification delivery failures are values
//! (`DeliveryOutcome::Failure`), not errors, and never propagate past the
//! forwarder.

use thiserror::Error;

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No channel name given as the first argument or via `CHANNEL`.
    #[error("channel name missing (pass it as the first argument or set CHANNEL)")]
    MissingChannel,

    #[error("WEBHOOK_URL is not set")]
    MissingWebhookUrl,

    #[error("invalid webhook url {url:?}")]
    InvalidWebhookUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Only http and https destinations are supported.
    #[error("unsupported webhook url scheme {scheme:?}")]
    UnsupportedWebhookScheme { scheme: String },

    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("invalid DATABASE_URL")]
    InvalidDatabaseUrl(#[source] tokio_postgres::Error),
}

/// Transport connection problems.
///
/// Fatal when they happen at startup; mid-run they trigger the subscriber's
/// reconnect loop instead of being returned to callers.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to postgres")]
    Connect(#[source] tokio_postgres::Error),

    #[error("failed to LISTEN on channel {channel:?}")]
    Listen {
        channel: String,
        #[source]
        source: tokio_postgres::Error,
    },
}
