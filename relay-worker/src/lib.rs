//! Pgcast - Postgres LISTEN/NOTIFY to webhook relay.
//!
//! This library backs the `pgcast-relay` binary, which holds a subscription
//! to one Postgres notification channel and forwards every payload to an
//! HTTP webhook endpoint, best-effort.
//!
//! ## Architecture
//!
//! ```text
//! NOTIFY → Subscriber (driver task) → bounded queue → relay loop → Forwarder → webhook
//! ```
//!
//! Delivery is at-most-once by design: there is no retry queue and no
//! persistence, and notifications published while the connection is down are
//! lost. A failed delivery never stops the loop.

pub mod backoff;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod relay;
pub mod subscriber;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigError, ConnectionError};
pub use forwarder::{DeliveryAttempt, DeliveryOutcome, FailureReason, Forwarder};
pub use subscriber::{Notification, Subscriber, SubscriberState, Subscription};
