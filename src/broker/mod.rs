//! Broker clients the outbound queue publishes through.
//!
//! The relay never talks to a broker directly. The drain thread of the
//! [`OutboundQueue`](crate::queue::OutboundQueue) owns exactly one
//! [`BrokerClient`] and is the only caller of [`BrokerClient::publish`], so
//! implementations need `Send` but never `Sync`.
//!
//! # Contract
//!
//! ```text
//! drain thread ──publish(topic, payload, on_complete)──► client   (returns at once)
//!                                                          │
//!              ◄────────── on_complete(Ok | Err) ──────────┘      (any thread, later)
//! ```
//!
//! `publish` must not wait for the broker's acknowledgement. The outcome is
//! reported through `on_complete`, which may run on any thread and is called
//! at most once.
//!
//! # Clients
//!
//! - [`LogBroker`] - logs every publish and acknowledges it immediately
//! - [`http::HttpBroker`] - forwards publishes to an HTTP bridge endpoint

// Rust guideline compliant 2025-01

pub mod http;

pub use http::HttpBroker;

use bytes::Bytes;

/// Completion callback passed with each publish.
pub type PublishCallback = Box<dyn FnOnce(Result<(), PublishError>) + Send>;

/// A publish the broker rejected or could not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError {
    /// Broker- or transport-specific error code, when one exists.
    pub code: Option<i32>,
    /// Human-readable reason.
    pub message: String,
}

impl PublishError {
    /// Create an error with an optional code.
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for PublishError {}

/// Outbound publish capability consumed by the relay.
pub trait BrokerClient: Send {
    /// Start publishing `payload` on `topic`.
    ///
    /// Must return without waiting for the broker; report the outcome
    /// through `on_complete`.
    fn publish(&mut self, topic: &str, payload: Bytes, on_complete: PublishCallback);
}

/// Dry-run client: logs each publish and acknowledges it immediately.
#[derive(Debug, Clone)]
pub struct LogBroker {
    client_id: String,
}

impl LogBroker {
    /// Create a logging client tagged with `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

impl BrokerClient for LogBroker {
    fn publish(&mut self, topic: &str, payload: Bytes, on_complete: PublishCallback) {
        log::info!(
            "[broker] {} topic:{} data:{}",
            self.client_id,
            topic,
            String::from_utf8_lossy(&payload)
        );
        on_complete(Ok(()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_publish_error_display_includes_code() {
        let err = PublishError::new(Some(503), "broker unavailable");
        assert_eq!(err.to_string(), "broker unavailable (code 503)");

        let err = PublishError::new(None, "connection reset");
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_log_broker_acknowledges_immediately() {
        let mut broker = LogBroker::new("test-client");
        let (tx, rx) = mpsc::channel();

        broker.publish(
            "test/topic",
            Bytes::from_static(b"{\"a\":1}"),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );

        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }
}
