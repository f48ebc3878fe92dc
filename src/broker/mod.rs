//! Broker client abstraction and transports.
//!
//! The core only talks to a broker through [`BrokerClient`]: a non-blocking
//! enqueue that copies the payload, and a servicing call the application
//! must invoke periodically to have delivery reports dispatched to the
//! [`DeliveryTracker`](crate::core::delivery::DeliveryTracker).
//!
//! Transports:
//!
//! * `kafka` — librdkafka producer via `rdkafka` (feature `kafka`).
//! * `mqtt` — `rumqttc` client with a background event-loop driver (feature `mqtt`, default).
//! * `stdout` — JSON lines on standard output, always available.

use std::{
    sync::Arc,
    time::Duration,
};

use tokio::time::Instant;
use tracing::info;

use crate::{config::transport::TransportConfig, core::delivery::DeliveryTracker};

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod stdout;

pub use error::{BrokerError, EnqueueError};

/// Longest single servicing call made while flushing.
const FLUSH_SERVICE_SLICE: Duration = Duration::from_millis(100);

/// Contract between the core and a broker client library.
///
/// Implementations must be safe for concurrent `enqueue` and `service`
/// calls, but the core drives them from a single task.
#[async_trait::async_trait]
pub trait BrokerClient: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    /// Requests an asynchronous send of `payload` to `topic`.
    ///
    /// The client copies the bytes; the caller's buffer may be dropped as
    /// soon as this returns. On `Ok` exactly one delivery report will later
    /// be dispatched from a [`service`](BrokerClient::service) call.
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), EnqueueError>;

    /// Dispatches ready delivery reports, waiting up to `timeout` for the
    /// first one. A zero timeout never blocks.
    async fn service(&self, timeout: Duration);

    /// Messages enqueued whose report has not been dispatched yet.
    fn in_flight(&self) -> usize;

    /// Serves reports until nothing is in flight or `timeout` elapses.
    /// Returns the number of messages still outstanding.
    async fn flush(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let outstanding = self.in_flight();
            if outstanding == 0 {
                return 0;
            }
            let now = Instant::now();
            if now >= deadline {
                return outstanding;
            }
            self.service((deadline - now).min(FLUSH_SERVICE_SLICE)).await;
        }
    }

    /// Releases the client. Reports not yet dispatched are lost.
    async fn close(&self) {}
}

/// Creates the client selected by `config.kind`.
pub async fn connect(
    config: &TransportConfig,
    tracker: Arc<DeliveryTracker>,
) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    use crate::config::transport::TransportKind;

    info!(
        "Connecting {} transport (address: {}, topic: {})",
        config.kind, config.address, config.topic
    );

    match config.kind {
        TransportKind::Stdout => Ok(Arc::new(stdout::StdoutClient::new(tracker))),

        #[cfg(feature = "kafka")]
        TransportKind::Kafka => Ok(Arc::new(kafka::KafkaClient::connect(
            &config.address,
            &config.kafka,
            tracker,
        )?)),
        #[cfg(not(feature = "kafka"))]
        TransportKind::Kafka => Err(BrokerError::Unsupported("kafka")),

        #[cfg(feature = "mqtt")]
        TransportKind::Mqtt => Ok(Arc::new(mqtt::MqttClient::connect(
            &config.address,
            &config.topic,
            &config.mqtt,
            tracker,
        )?)),
        #[cfg(not(feature = "mqtt"))]
        TransportKind::Mqtt => Err(BrokerError::Unsupported("mqtt")),
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MockClient, *};

    #[tokio::test(start_paused = true)]
    async fn test_default_flush_returns_zero_when_all_reported() {
        let client = MockClient::new(Arc::new(DeliveryTracker::new()));
        client.enqueue("t", b"one").unwrap();
        client.enqueue("t", b"two").unwrap();
        assert_eq!(client.in_flight(), 2);

        assert_eq!(client.flush(Duration::from_secs(10)).await, 0);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_flush_returns_outstanding_on_timeout() {
        let client = MockClient::new(Arc::new(DeliveryTracker::new()));
        client.hold_reports(true);
        client.enqueue("t", b"one").unwrap();
        client.enqueue("t", b"two").unwrap();
        client.enqueue("t", b"three").unwrap();

        let start = Instant::now();
        assert_eq!(client.flush(Duration::from_millis(1500)).await, 3);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_connect_stdout() {
        let config = TransportConfig {
            kind: crate::config::transport::TransportKind::Stdout,
            ..Default::default()
        };
        let client = connect(&config, Arc::new(DeliveryTracker::new()))
            .await
            .unwrap();
        assert_eq!(client.name(), "stdout");
    }

    #[cfg(not(feature = "kafka"))]
    #[tokio::test]
    async fn test_connect_kafka_without_feature() {
        let config = TransportConfig {
            kind: crate::config::transport::TransportKind::Kafka,
            ..Default::default()
        };
        let result = connect(&config, Arc::new(DeliveryTracker::new())).await;
        assert!(matches!(result, Err(BrokerError::Unsupported("kafka"))));
    }
}
