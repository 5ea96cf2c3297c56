//! Webhook forwarding - one notification in, one HTTP POST out.
//!
//! The forwarder is stateless per call and shares a single HTTP client across
//! all attempts. A failed delivery is logged and reported as a value; it never
//! propagates as an error, so the listener loop keeps running. No retry is
//! performed on failure.

use std::fmt;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, error, info};

/// Result of one forwarding try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink answered with a 2xx status.
    Success(u16),
    Failure(FailureReason),
}

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Non-2xx response from the sink.
    Status(u16),
    Timeout,
    /// Network-level error (connect failure, DNS, broken transfer).
    Request(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Status(status) => write!(f, "{status}"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Request(message) => write!(f, "{message}"),
        }
    }
}

/// Ephemeral record of one forwarding try, used only for logging.
#[derive(Debug)]
pub struct DeliveryAttempt<'a> {
    pub url: &'a str,
    pub payload: &'a str,
    pub outcome: DeliveryOutcome,
}

impl DeliveryAttempt<'_> {
    fn log(&self) {
        match &self.outcome {
            DeliveryOutcome::Success(status) => info!(
                url = self.url,
                status_code = *status,
                payload_bytes = self.payload.len(),
                "webhook_delivered"
            ),
            DeliveryOutcome::Failure(reason) => error!(
                url = self.url,
                reason = %reason,
                payload_bytes = self.payload.len(),
                "webhook_delivery_failed"
            ),
        }
    }
}

/// Stateless webhook forwarder around a shared HTTP client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self { client, timeout })
    }

    /// POST one payload to the webhook destination.
    ///
    /// The body is the raw payload, verbatim; the `Content-Type` header is
    /// always `application/json` and it is the publisher's responsibility to
    /// emit valid JSON if the destination expects it. Any 2xx status counts
    /// as success, everything else (including network errors and timeouts)
    /// as failure.
    pub async fn forward(&self, url: &str, payload: &str) -> DeliveryOutcome {
        debug!(url, payload_bytes = payload.len(), "webhook_post_starting");

        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_owned())
            .timeout(self.timeout)
            .send()
            .await;

        let outcome = match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryOutcome::Success(status.as_u16())
                } else {
                    DeliveryOutcome::Failure(FailureReason::Status(status.as_u16()))
                }
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::Failure(FailureReason::Timeout),
            Err(e) => DeliveryOutcome::Failure(FailureReason::Request(e.to_string())),
        };

        let attempt = DeliveryAttempt {
            url,
            payload,
            outcome,
        };
        attempt.log();
        attempt.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;

    /// Captures requests and answers with queued statuses (200 once empty).
    #[derive(Clone, Default)]
    struct Sink {
        requests: Arc<Mutex<Vec<(Option<String>, String)>>>,
        statuses: Arc<Mutex<VecDeque<u16>>>,
    }

    impl Sink {
        fn bodies(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, body)| body.clone())
                .collect()
        }
    }

    async fn handle(State(sink): State<Sink>, headers: HeaderMap, body: String) -> StatusCode {
        let content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        sink.requests.lock().unwrap().push((content_type, body));

        let status = sink.statuses.lock().unwrap().pop_front().unwrap_or(200);
        StatusCode::from_u16(status).unwrap()
    }

    async fn spawn_sink(sink: Sink) -> String {
        let app = Router::new().route("/hook", post(handle)).with_state(sink);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hook")
    }

    #[tokio::test]
    async fn test_forward_posts_payload_verbatim() {
        let sink = Sink::default();
        let url = spawn_sink(sink.clone()).await;
        let forwarder = Forwarder::new(Duration::from_secs(2)).unwrap();

        let outcome = forwarder.forward(&url, r#"{"id":1}"#).await;

        assert_eq!(outcome, DeliveryOutcome::Success(200));
        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.as_deref(), Some("application/json"));
        assert_eq!(requests[0].1, r#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_forward_classifies_non_2xx_as_failure() {
        let sink = Sink::default();
        sink.statuses.lock().unwrap().push_back(500);
        let url = spawn_sink(sink.clone()).await;
        let forwarder = Forwarder::new(Duration::from_secs(2)).unwrap();

        let outcome = forwarder.forward(&url, "{}").await;

        let reason = match outcome {
            DeliveryOutcome::Failure(reason) => reason,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(reason, FailureReason::Status(500));
        assert_eq!(reason.to_string(), "500");
    }

    #[tokio::test]
    async fn test_forward_classifies_network_error() {
        // Bind to grab a free port, then drop the listener before connecting.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(Duration::from_secs(2)).unwrap();
        let outcome = forwarder.forward(&format!("http://{addr}/hook"), "{}").await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Failure(FailureReason::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_forward_classifies_timeout() {
        async fn slow() -> StatusCode {
            tokio::time::sleep(Duration::from_millis(500)).await;
            StatusCode::OK
        }

        let app = Router::new().route("/hook", post(slow));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let forwarder = Forwarder::new(Duration::from_millis(50)).unwrap();
        let outcome = forwarder.forward(&format!("http://{addr}/hook"), "{}").await;

        assert_eq!(outcome, DeliveryOutcome::Failure(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn test_forward_never_deduplicates() {
        let sink = Sink::default();
        let url = spawn_sink(sink.clone()).await;
        let forwarder = Forwarder::new(Duration::from_secs(2)).unwrap();

        let first = forwarder.forward(&url, r#"{"id":1}"#).await;
        let second = forwarder.forward(&url, r#"{"id":1}"#).await;

        assert_eq!(first, DeliveryOutcome::Success(200));
        assert_eq!(second, DeliveryOutcome::Success(200));
        assert_eq!(sink.bodies(), vec![r#"{"id":1}"#, r#"{"id":1}"#]);
    }
}
