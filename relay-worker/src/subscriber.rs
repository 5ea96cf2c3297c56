//! Postgres LISTEN/NOTIFY subscriber.
//!
//! This module owns the single transport connection. It registers interest in
//! one channel, then runs a driver task that turns server notifications into
//! [`Notification`] values on a bounded queue. The queue decouples the receive
//! rate from the forward rate: when it fills up, the driver stops reading from
//! the socket until the consumer catches up.
//!
//! Connection loss mid-run triggers reconnection with bounded exponential
//! backoff; the `LISTEN` registration is re-issued after every successful
//! reconnect. Notifications published while disconnected are lost - there is
//! no replay log.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tracing::{debug, error, info, warn};

use futures::{stream, StreamExt};

use crate::backoff::Backoff;
use crate::config::Config;
use crate::error::ConnectionError;

/// Buffer between the connection I/O task and the driver.
const MESSAGE_BUFFER: usize = 64;

/// One message received on the subscribed channel.
///
/// The payload is opaque; it is forwarded verbatim and never parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Connection lifecycle of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connected,
    Subscribed,
}

/// Transport-level events that move the subscriber between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectOk,
    ListenOk,
    ConnectionLost,
}

impl SubscriberState {
    /// Pure transition function for the reconnect state machine.
    pub fn transition(self, event: TransportEvent) -> SubscriberState {
        match (self, event) {
            (_, TransportEvent::ConnectionLost) => SubscriberState::Disconnected,
            (SubscriberState::Disconnected, TransportEvent::ConnectOk) => {
                SubscriberState::Connected
            }
            (SubscriberState::Connected, TransportEvent::ListenOk) => SubscriberState::Subscribed,
            (state, _) => state,
        }
    }
}

fn advance(state: &watch::Sender<SubscriberState>, event: TransportEvent) {
    let current = *state.borrow();
    let next = current.transition(event);
    state.send_replace(next);
    debug!(state = ?next, "subscriber_state_changed");
}

/// Quote a channel name as a SQL identifier so arbitrary argv values are safe
/// in a `LISTEN` statement (which takes no bind parameters).
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A live connection: the client handle plus the stream of async messages.
///
/// The connection itself is driven by a spawned I/O task; when the connection
/// closes or errors, the task exits and the message channel drains to `None`.
struct Conn {
    client: Client,
    messages: mpsc::Receiver<Result<AsyncMessage, tokio_postgres::Error>>,
}

impl Conn {
    async fn open(pg: &tokio_postgres::Config) -> Result<Conn, ConnectionError> {
        let (client, mut connection) = pg.connect(NoTls).await.map_err(ConnectionError::Connect)?;

        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        tokio::spawn(async move {
            let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                let failed = message.is_err();
                if tx.send(message).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Conn {
            client,
            messages: rx,
        })
    }

    async fn listen(&self, channel: &str) -> Result<(), ConnectionError> {
        self.client
            .batch_execute(&format!("LISTEN {}", quote_ident(channel)))
            .await
            .map_err(|source| ConnectionError::Listen {
                channel: channel.to_string(),
                source,
            })
    }
}

/// Owner of the transport connection, before a channel is registered.
///
/// Startup is split in two fallible steps so both initial failure modes stay
/// fatal: `connect` reaches the server, `subscribe` registers the channel and
/// hands ownership to the driver task.
pub struct Subscriber {
    pg: tokio_postgres::Config,
    queue_capacity: usize,
    reconnect_delay_ms: (u64, u64),
    conn: Conn,
    state: watch::Sender<SubscriberState>,
    state_rx: watch::Receiver<SubscriberState>,
}

impl Subscriber {
    /// Establish the initial connection. Failure here is fatal.
    pub async fn connect(config: &Config) -> Result<Subscriber, ConnectionError> {
        let (state, state_rx) = watch::channel(SubscriberState::Disconnected);

        info!("postgres_connecting");
        let conn = Conn::open(&config.pg).await?;
        advance(&state, TransportEvent::ConnectOk);
        info!("postgres_connected");

        Ok(Subscriber {
            pg: config.pg.clone(),
            queue_capacity: config.queue_capacity,
            reconnect_delay_ms: config.reconnect_delay_ms,
            conn,
            state,
            state_rx,
        })
    }

    /// Register the channel and spawn the driver task.
    pub async fn subscribe(self, channel: &str) -> Result<Subscription, ConnectionError> {
        self.conn.listen(channel).await?;
        advance(&self.state, TransportEvent::ListenOk);
        info!(channel = channel, "channel_subscribed");

        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);

        let driver = Driver {
            pg: self.pg,
            channel: channel.to_string(),
            queue: queue_tx,
            state: self.state,
            backoff: Backoff::new(
                Duration::from_millis(self.reconnect_delay_ms.0),
                Duration::from_millis(self.reconnect_delay_ms.1),
            ),
        };
        let handle = tokio::spawn(driver.run(self.conn));

        Ok(Subscription {
            channel: channel.to_string(),
            queue: queue_rx,
            state: self.state_rx,
            driver: handle,
        })
    }
}

/// An active listen registration.
///
/// Dropping a `Subscription` aborts the driver task, which drops the client
/// and releases the connection; `close` does the same explicitly and waits
/// for the task to finish.
pub struct Subscription {
    channel: String,
    queue: mpsc::Receiver<Notification>,
    state: watch::Receiver<SubscriberState>,
    driver: JoinHandle<()>,
}

impl Subscription {
    /// Receive the next notification, in the order it arrived on the channel.
    ///
    /// Returns `None` once the subscription has been closed.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.queue.recv().await
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Tear down the subscription and release the connection.
    pub async fn close(mut self) {
        self.driver.abort();
        let _ = (&mut self.driver).await;
        info!(channel = %self.channel, "subscription_closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Builds a `Subscription` fed by hand, for exercising consumers without a
/// live server.
#[cfg(test)]
pub(crate) fn test_subscription(
    channel: &str,
    capacity: usize,
) -> (mpsc::Sender<Notification>, Subscription) {
    let (tx, rx) = mpsc::channel(capacity);
    // The watch receiver keeps the last value after the sender is gone.
    let (_state_tx, state_rx) = watch::channel(SubscriberState::Subscribed);
    let driver = tokio::spawn(std::future::pending::<()>());

    (
        tx,
        Subscription {
            channel: channel.to_string(),
            queue: rx,
            state: state_rx,
            driver,
        },
    )
}

/// Long-lived task that pumps notifications into the queue and reconnects on
/// connection loss.
struct Driver {
    pg: tokio_postgres::Config,
    channel: String,
    queue: mpsc::Sender<Notification>,
    state: watch::Sender<SubscriberState>,
    backoff: Backoff,
}

impl Driver {
    async fn run(mut self, mut conn: Conn) {
        loop {
            match conn.messages.recv().await {
                Some(Ok(AsyncMessage::Notification(raw))) => {
                    let notification = Notification {
                        channel: raw.channel().to_string(),
                        payload: raw.payload().to_string(),
                    };
                    // A full queue suspends here, backpressuring the socket.
                    if self.queue.send(notification).await.is_err() {
                        return;
                    }
                }
                Some(Ok(_)) => {
                    // Notices and parameter changes are not interesting.
                }
                Some(Err(e)) => {
                    error!(error = %e, "postgres_connection_error");
                    conn = match self.reconnect().await {
                        Some(conn) => conn,
                        None => return,
                    };
                }
                None => {
                    warn!("postgres_connection_closed");
                    conn = match self.reconnect().await {
                        Some(conn) => conn,
                        None => return,
                    };
                }
            }
        }
    }

    /// Reconnect with bounded exponential backoff and re-issue the `LISTEN`.
    ///
    /// Retries until it succeeds; returns `None` only when the subscription
    /// has been dropped in the meantime.
    async fn reconnect(&mut self) -> Option<Conn> {
        advance(&self.state, TransportEvent::ConnectionLost);

        loop {
            if self.queue.is_closed() {
                return None;
            }

            let delay = self.backoff.next_delay();
            warn!(delay_ms = delay.as_millis() as u64, "postgres_reconnect_waiting");
            sleep(delay).await;

            let conn = match Conn::open(&self.pg).await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "postgres_reconnect_failed");
                    continue;
                }
            };
            advance(&self.state, TransportEvent::ConnectOk);

            if let Err(e) = conn.listen(&self.channel).await {
                error!(error = %e, "channel_resubscribe_failed");
                advance(&self.state, TransportEvent::ConnectionLost);
                continue;
            }
            advance(&self.state, TransportEvent::ListenOk);

            self.backoff.reset();
            info!(channel = %self.channel, "channel_resubscribed");
            return Some(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_plain() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("or\"ders"), "\"or\"\"ders\"");
    }

    #[test]
    fn test_state_machine_happy_path() {
        let state = SubscriberState::Disconnected;
        let state = state.transition(TransportEvent::ConnectOk);
        assert_eq!(state, SubscriberState::Connected);
        let state = state.transition(TransportEvent::ListenOk);
        assert_eq!(state, SubscriberState::Subscribed);
    }

    #[test]
    fn test_state_machine_loss_from_any_state() {
        for state in [
            SubscriberState::Disconnected,
            SubscriberState::Connected,
            SubscriberState::Subscribed,
        ] {
            assert_eq!(
                state.transition(TransportEvent::ConnectionLost),
                SubscriberState::Disconnected
            );
        }
    }

    #[test]
    fn test_state_machine_ignores_out_of_order_events() {
        // ListenOk cannot skip the Connected state
        assert_eq!(
            SubscriberState::Disconnected.transition(TransportEvent::ListenOk),
            SubscriberState::Disconnected
        );
        // A duplicate ConnectOk while already subscribed changes nothing
        assert_eq!(
            SubscriberState::Subscribed.transition(TransportEvent::ConnectOk),
            SubscriberState::Subscribed
        );
    }

    #[tokio::test]
    async fn test_subscription_reenters_subscribed_after_loss() {
        let (state, state_rx) = watch::channel(SubscriberState::Subscribed);
        advance(&state, TransportEvent::ConnectionLost);
        assert_eq!(*state_rx.borrow(), SubscriberState::Disconnected);

        advance(&state, TransportEvent::ConnectOk);
        advance(&state, TransportEvent::ListenOk);
        assert_eq!(*state_rx.borrow(), SubscriberState::Subscribed);
    }

    #[tokio::test]
    async fn test_recv_preserves_arrival_order() {
        let (tx, mut subscription) = test_subscription("orders", 8);

        for payload in ["a", "b", "c"] {
            tx.send(Notification {
                channel: "orders".to_string(),
                payload: payload.to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(notification) = subscription.recv().await {
            seen.push(notification.payload);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }
}
