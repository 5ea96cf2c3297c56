//! The listen-and-relay loop.
//!
//! This module wires the subscriber to the forwarder and drives the process
//! main loop:
//! 1. Connects to Postgres and issues `LISTEN` (both fatal on failure)
//! 2. Pulls notifications off the subscription queue
//! 3. Forwards each payload serially to the webhook destination
//! 4. Handles graceful shutdown on SIGINT/SIGTERM
//!
//! Delivery failures are logged and never break the loop. Forwarding is
//! serialized, so completion order matches arrival order and an in-flight
//! POST (bounded by the request timeout) finishes before shutdown proceeds.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::forwarder::Forwarder;
use crate::subscriber::{Notification, Subscriber, Subscription};

/// Run the relay until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let forwarder = Forwarder::new(Duration::from_millis(config.request_timeout_ms))
        .context("Failed to build HTTP client")?;

    let subscriber = Subscriber::connect(&config)
        .await
        .context("Failed to connect to Postgres")?;

    let mut subscription = subscriber
        .subscribe(&config.channel)
        .await
        .with_context(|| format!("Failed to subscribe to channel {:?}", config.channel))?;

    info!(
        channel = %config.channel,
        webhook = %config.webhook_url,
        "relay_ready"
    );

    let clean = relay_loop(
        &mut subscription,
        &forwarder,
        config.webhook_url.as_str(),
        shutdown_signal(),
    )
    .await;

    subscription.close().await;
    info!("relay_shutdown_complete");

    anyhow::ensure!(clean, "subscription ended unexpectedly");
    Ok(())
}

/// Pump notifications into the forwarder until shutdown or queue end.
///
/// Returns `true` on a signal-driven shutdown, `false` if the subscription
/// stopped producing on its own.
async fn relay_loop(
    subscription: &mut Subscription,
    forwarder: &Forwarder,
    webhook_url: &str,
    shutdown: impl Future<Output = ()>,
) -> bool {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("relay_stopping");
                return true;
            }
            maybe = subscription.recv() => {
                match maybe {
                    Some(notification) => deliver(forwarder, webhook_url, &notification).await,
                    None => {
                        warn!("subscription_ended");
                        return false;
                    }
                }
            }
        }
    }
}

async fn deliver(forwarder: &Forwarder, webhook_url: &str, notification: &Notification) {
    info!(
        channel = %notification.channel,
        payload_bytes = notification.payload.len(),
        "notification_received"
    );

    // Outcome logging lives in the forwarder; a failure here is already
    // recorded and must not stop the loop.
    let _outcome = forwarder.forward(webhook_url, &notification.payload).await;
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
