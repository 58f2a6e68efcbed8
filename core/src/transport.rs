//! The capability set a message transport must provide to feed the consumer.
//!
//! A [`Transport`] knows how to dial. Each successful dial yields a fresh
//! [`ConsumerSession`]: one live connection that can receive, acknowledge and close.
//! Sessions are never reused; after any failure the connector drops the session and
//! dials again.
//!
//! # Delivery Semantics
//!
//! Transports are expected to deliver at least once. The consumer acknowledges a message
//! only after acting on it, so a crash between the two causes a redelivery, which is
//! harmless because invalidation is idempotent.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by a [`Transport`] or [`ConsumerSession`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not establish a session.
    #[error("Dial failed: {0}")]
    DialFailed(String),

    /// An established session became unusable.
    #[error("Session lost: {0}")]
    SessionLost(String),

    /// A single acknowledgement was rejected; the session is still usable.
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),
}

/// Identifies a delivered message for acknowledgement.
///
/// For partitioned logs this is the topic, partition and offset. Queue-style transports
/// may use partition 0 and a per-session delivery counter as the offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    /// Topic or queue the message came from
    pub source: String,
    /// Partition within the source
    pub partition: i32,
    /// Position within the partition
    pub offset: i64,
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.source, self.partition, self.offset)
    }
}

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Raw payload bytes, decoded by the consumer
    pub payload: Vec<u8>,
    /// Message key, when the transport has one (logged only)
    pub key: Option<String>,
    /// Acknowledgement handle
    pub tag: DeliveryTag,
}

/// Future returned by [`ConsumerSession`] and [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// A message transport that can be dialed repeatedly.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the connector can hold an
/// `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Establish a new session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DialFailed`] if the transport is unreachable.
    fn connect(&self) -> TransportFuture<'_, Box<dyn ConsumerSession>>;

    /// Human-readable endpoint description for logs (brokers, URL, ...).
    fn describe(&self) -> String;
}

/// One live connection to the transport.
pub trait ConsumerSession: Send {
    /// Wait for the next message.
    ///
    /// Must be cancel-safe: the consumer races it against shutdown, and a dropped call
    /// must not lose a message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SessionLost`] when the session can no longer deliver.
    fn recv(&mut self) -> TransportFuture<'_, Delivery>;

    /// Acknowledge a message previously returned by [`recv`](Self::recv).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckFailed`] if this acknowledgement was rejected, or
    /// [`TransportError::SessionLost`] if the session is gone.
    fn ack(&mut self, tag: DeliveryTag) -> TransportFuture<'_, ()>;

    /// Release the connection. Called exactly once on every exit path.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_tag_display() {
        let tag = DeliveryTag {
            source: "todo-events".to_string(),
            partition: 2,
            offset: 41,
        };
        assert_eq!(tag.to_string(), "todo-events[2]@41");
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            TransportError::DialFailed("broker down".into()).to_string(),
            "Dial failed: broker down"
        );
        assert_eq!(
            TransportError::SessionLost("rebalance".into()).to_string(),
            "Session lost: rebalance"
        );
    }
}
