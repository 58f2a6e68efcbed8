//! Kafka/Redpanda change-event transport for Taskflow Analytics.
//!
//! This crate provides [`KafkaTransport`], an implementation of the
//! [`Transport`] capability from `taskflow-analytics-core` built on rdkafka's
//! [`StreamConsumer`].
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - `enable.auto.commit` is off; an offset is committed only when the consumer
//!   acknowledges the message, which happens after the cache was invalidated
//! - If the process crashes before the commit, the message is redelivered
//! - Invalidation is idempotent, so redelivery is harmless
//! - Ordering is guaranteed within a partition (the todo service keys by username)
//!
//! # Sessions
//!
//! Every [`Transport::connect`] creates a fresh consumer, subscribes it and probes the
//! brokers with a metadata fetch bounded by the dial timeout. A consumer that cannot
//! reach any broker therefore fails the dial instead of hanging in `recv`.
//!
//! # Example
//!
//! ```no_run
//! use taskflow_analytics_redpanda::KafkaTransport;
//! use taskflow_analytics_core::Transport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = KafkaTransport::builder()
//!     .brokers("localhost:9092")
//!     .topic("todo-events")
//!     .consumer_group("analytics-service")
//!     .build()?;
//!
//! let mut session = transport.connect().await?;
//! let delivery = session.recv().await?;
//! session.ack(delivery.tag).await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use taskflow_analytics_core::transport::TransportFuture;
use taskflow_analytics_core::{ConsumerSession, Delivery, DeliveryTag, Transport, TransportError};

/// Kafka/Redpanda transport.
///
/// Holds configuration only; each dial builds a new consumer.
///
/// # Configuration
///
/// - **Brokers**: bootstrap servers (required)
/// - **Topic**: topic to consume (required)
/// - **Consumer group**: default `analytics-service`
/// - **Offset reset**: where a new group starts reading (default `latest`)
/// - **Session timeout / heartbeat**: group membership timing (default 10 s / 3 s)
/// - **Dial timeout**: bound on the broker metadata probe (default 5 s)
/// - **Max consecutive errors**: receive errors in a row before the session is
///   reported lost (default 5)
#[derive(Debug, Clone)]
pub struct KafkaTransport {
    brokers: String,
    topic: String,
    consumer_group: String,
    auto_offset_reset: String,
    session_timeout: Duration,
    heartbeat_interval: Duration,
    dial_timeout: Duration,
    max_consecutive_errors: u32,
}

impl KafkaTransport {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> KafkaTransportBuilder {
        KafkaTransportBuilder::default()
    }

    /// The bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// The consumed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The rdkafka configuration used for every new consumer.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", millis(self.session_timeout))
            .set("heartbeat.interval.ms", millis(self.heartbeat_interval))
            .set("enable.partition.eof", "false");
        config
    }
}

impl Transport for KafkaTransport {
    fn connect(&self) -> TransportFuture<'_, Box<dyn ConsumerSession>> {
        let config = self.client_config();
        let topic = self.topic.clone();
        let dial_timeout = self.dial_timeout;
        let max_consecutive_errors = self.max_consecutive_errors;

        Box::pin(async move {
            let consumer: StreamConsumer = config.create().map_err(|e| {
                TransportError::DialFailed(format!("Failed to create consumer: {e}"))
            })?;

            consumer.subscribe(&[topic.as_str()]).map_err(|e| {
                TransportError::DialFailed(format!("Failed to subscribe to '{topic}': {e}"))
            })?;

            // The metadata fetch blocks the calling thread.
            let probe_topic = topic.clone();
            let consumer = tokio::task::spawn_blocking(move || {
                consumer
                    .fetch_metadata(Some(&probe_topic), Timeout::After(dial_timeout))
                    .map(|_| consumer)
            })
            .await
            .map_err(|e| TransportError::DialFailed(format!("Broker probe aborted: {e}")))?
            .map_err(|e| TransportError::DialFailed(format!("Brokers unreachable: {e}")))?;

            tracing::info!(
                topic = %topic,
                manual_commit = true,
                "Kafka session established"
            );

            Ok(Box::new(KafkaSession {
                consumer: Some(consumer),
                topic,
                consecutive_errors: 0,
                max_consecutive_errors,
            }) as Box<dyn ConsumerSession>)
        })
    }

    fn describe(&self) -> String {
        format!("kafka://{}/{}", self.brokers, self.topic)
    }
}

/// Builder for [`KafkaTransport`].
#[derive(Default)]
pub struct KafkaTransportBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    dial_timeout: Option<Duration>,
    max_consecutive_errors: Option<u32>,
}

impl KafkaTransportBuilder {
    /// Set the bootstrap servers (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic to consume.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group (default: `analytics-service`).
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a group without committed offsets starts reading.
    ///
    /// - `"latest"` (default): only changes published from now on
    /// - `"earliest"`: replay the retained log
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the group session timeout (default: 10 s).
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Set the group heartbeat interval (default: 3 s).
    #[must_use]
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Set the bound on the broker probe during dial (default: 5 s).
    #[must_use]
    pub const fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Set how many receive errors in a row end the session (default: 5).
    #[must_use]
    pub const fn max_consecutive_errors(mut self, count: u32) -> Self {
        self.max_consecutive_errors = Some(count);
        self
    }

    /// Build the [`KafkaTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DialFailed`] if brokers or topic are not set.
    pub fn build(self) -> Result<KafkaTransport, TransportError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| TransportError::DialFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TransportError::DialFailed("Topic not configured".to_string()))?;

        let transport = KafkaTransport {
            brokers,
            topic,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| "analytics-service".to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(10)),
            heartbeat_interval: self.heartbeat_interval.unwrap_or(Duration::from_secs(3)),
            dial_timeout: self.dial_timeout.unwrap_or(Duration::from_secs(5)),
            max_consecutive_errors: self.max_consecutive_errors.unwrap_or(5).max(1),
        };

        tracing::info!(
            brokers = %transport.brokers,
            topic = %transport.topic,
            consumer_group = %transport.consumer_group,
            auto_offset_reset = %transport.auto_offset_reset,
            "KafkaTransport configured"
        );

        Ok(transport)
    }
}

/// One live consumer. Closed explicitly by the connector; dropping it also releases
/// the client.
struct KafkaSession {
    consumer: Option<StreamConsumer>,
    topic: String,
    consecutive_errors: u32,
    max_consecutive_errors: u32,
}

impl ConsumerSession for KafkaSession {
    fn recv(&mut self) -> TransportFuture<'_, Delivery> {
        Box::pin(async move {
            loop {
                let Some(consumer) = self.consumer.as_ref() else {
                    return Err(TransportError::SessionLost("session closed".to_string()));
                };

                let received = consumer.recv().await.map(|message| to_delivery(&message));

                match received {
                    Ok(delivery) => {
                        self.consecutive_errors = 0;
                        tracing::trace!(tag = %delivery.tag, key = ?delivery.key, "Message received");
                        return Ok(delivery);
                    }
                    Err(error) => {
                        self.consecutive_errors += 1;
                        if self.consecutive_errors >= self.max_consecutive_errors {
                            return Err(TransportError::SessionLost(format!(
                                "{} consecutive receive errors, last: {error}",
                                self.consecutive_errors
                            )));
                        }
                        tracing::warn!(
                            topic = %self.topic,
                            error = %error,
                            consecutive_errors = self.consecutive_errors,
                            "Kafka receive error"
                        );
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        })
    }

    fn ack(&mut self, tag: DeliveryTag) -> TransportFuture<'_, ()> {
        let result = self.commit(&tag);
        Box::pin(async move { result })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let consumer = self.consumer.take();
        let topic = self.topic.clone();

        Box::pin(async move {
            let Some(consumer) = consumer else {
                return;
            };
            consumer.unsubscribe();

            // Leaving the group blocks until the broker acknowledges.
            if let Err(e) = tokio::task::spawn_blocking(move || drop(consumer)).await {
                tracing::warn!(topic = %topic, error = %e, "Kafka consumer shutdown aborted");
            }
            tracing::info!(topic = %topic, "Kafka session closed");
        })
    }
}

impl KafkaSession {
    fn commit(&self, tag: &DeliveryTag) -> Result<(), TransportError> {
        let Some(consumer) = self.consumer.as_ref() else {
            return Err(TransportError::SessionLost("session closed".to_string()));
        };

        // The committed offset is the next one to read.
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&tag.source, tag.partition, Offset::Offset(tag.offset + 1))
            .map_err(|e| TransportError::AckFailed(format!("Invalid offset {tag}: {e}")))?;

        consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| TransportError::AckFailed(format!("Failed to commit {tag}: {e}")))
    }
}

fn to_delivery(message: &BorrowedMessage<'_>) -> Delivery {
    Delivery {
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        tag: DeliveryTag {
            source: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        },
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn kafka_transport_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaTransport>();
        assert_sync::<KafkaTransport>();
        assert_send::<KafkaSession>();
    }

    #[test]
    fn builder_requires_brokers_and_topic() {
        assert!(KafkaTransport::builder().topic("todo-events").build().is_err());
        assert!(KafkaTransport::builder().brokers("localhost:9092").build().is_err());
        assert!(KafkaTransport::builder()
            .brokers("  ")
            .topic("todo-events")
            .build()
            .is_err());
    }

    #[test]
    fn client_config_uses_manual_commits_and_defaults() {
        let transport = KafkaTransport::builder()
            .brokers("kafka:29092")
            .topic("todo-events")
            .build()
            .unwrap();

        let config = transport.client_config();

        assert_eq!(config.get("bootstrap.servers"), Some("kafka:29092"));
        assert_eq!(config.get("group.id"), Some("analytics-service"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("session.timeout.ms"), Some("10000"));
        assert_eq!(config.get("heartbeat.interval.ms"), Some("3000"));
        assert_eq!(transport.describe(), "kafka://kafka:29092/todo-events");
    }

    #[test]
    fn client_config_honours_overrides() {
        let transport = KafkaTransport::builder()
            .brokers("localhost:9092")
            .topic("todo-events")
            .consumer_group("analytics-replay")
            .auto_offset_reset("earliest")
            .session_timeout(Duration::from_secs(30))
            .heartbeat_interval(Duration::from_secs(10))
            .build()
            .unwrap();

        let config = transport.client_config();

        assert_eq!(config.get("group.id"), Some("analytics-replay"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("session.timeout.ms"), Some("30000"));
        assert_eq!(config.get("heartbeat.interval.ms"), Some("10000"));
    }
}
