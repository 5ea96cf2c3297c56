//! pgcast-relay - Postgres LISTEN/NOTIFY to webhook relay.
//!
//! Subscribes to one notification channel and POSTs every payload, verbatim,
//! to the configured webhook URL. Delivery is best-effort: failures are
//! logged and the next notification is processed as usual.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pgcast::{relay, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("relay_starting");

    // Channel name is the first positional argument, everything else is
    // environment-sourced.
    let config = Config::from_env(std::env::args().nth(1)).context("Invalid configuration")?;
    tracing::info!(
        channel = %config.channel,
        webhook = %config.webhook_url,
        request_timeout_ms = config.request_timeout_ms,
        queue_capacity = config.queue_capacity,
        "config_loaded"
    );

    relay::run(config).await?;

    Ok(())
}
