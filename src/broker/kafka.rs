//! Kafka transport over librdkafka (`rdkafka::producer::BaseProducer`).
//!
//! librdkafka copies each payload on send, queues it internally and invokes
//! the delivery callback from `poll`. The callback lives in
//! [`TrackingContext`], so reports reach the [`DeliveryTracker`] on whatever
//! thread performs the servicing call.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use rdkafka::{
    config::ClientConfig,
    error::KafkaError,
    message::{DeliveryResult, Message},
    producer::{BaseProducer, BaseRecord, Producer, ProducerContext},
    types::RDKafkaErrorCode,
    ClientContext,
};
use tracing::{debug, info, warn};

use super::{BrokerClient, BrokerError, EnqueueError};
use crate::{
    config::transport::KafkaConfig,
    core::delivery::{DeliveryReport, DeliveryTracker},
};

/// Producer context that forwards delivery results to the tracker.
pub struct TrackingContext {
    tracker: Arc<DeliveryTracker>,
    pending: AtomicUsize,
}

impl ClientContext for TrackingContext {}

impl ProducerContext for TrackingContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        let report = match result {
            Ok(message) => {
                DeliveryReport::delivered(message.payload_len(), Some(message.partition()))
            }
            Err((err, message)) => DeliveryReport::failed(message.payload_len(), err.to_string()),
        };
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.tracker.on_delivery(&report);
    }
}

pub struct KafkaClient {
    producer: Arc<BaseProducer<TrackingContext>>,
}

impl KafkaClient {
    /// Creates the producer. `address` becomes `bootstrap.servers`; the
    /// configured properties are applied on top, unmodified.
    pub fn connect(
        address: &str,
        config: &KafkaConfig,
        tracker: Arc<DeliveryTracker>,
    ) -> Result<Self, BrokerError> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", address);
        for (key, value) in &config.properties {
            client_config.set(key, value);
        }

        let context = TrackingContext {
            tracker,
            pending: AtomicUsize::new(0),
        };
        let producer: BaseProducer<TrackingContext> = client_config
            .create_with_context(context)
            .map_err(|e| match e {
                KafkaError::ClientConfig(..) => BrokerError::Config(e.to_string()),
                other => BrokerError::Create(other.to_string()),
            })?;

        info!(
            "Kafka producer created (bootstrap.servers: {}, {} extra propertie(s))",
            address,
            config.properties.len()
        );
        Ok(Self {
            producer: Arc::new(producer),
        })
    }

    fn pending(&self) -> usize {
        self.producer.context().pending.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl BrokerClient for KafkaClient {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), EnqueueError> {
        // Counted before sending: the callback may fire from another
        // thread's poll before send returns.
        let context = self.producer.context();
        context.pending.fetch_add(1, Ordering::AcqRel);

        match self
            .producer
            .send(BaseRecord::<(), [u8]>::to(topic).payload(payload))
        {
            Ok(()) => Ok(()),
            Err((e, _record)) => {
                context.pending.fetch_sub(1, Ordering::AcqRel);
                match e {
                    KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => {
                        Err(EnqueueError::QueueFull)
                    }
                    other => Err(EnqueueError::Rejected(other.to_string())),
                }
            }
        }
    }

    async fn service(&self, timeout: Duration) {
        if timeout.is_zero() {
            self.producer.poll(Duration::ZERO);
            return;
        }
        // If this future is dropped (shutdown select), the blocking poll
        // still runs to its timeout. librdkafka allows it to overlap a later
        // poll or flush; reports are still dispatched exactly once.
        let producer = self.producer.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || {
            producer.poll(timeout);
        })
        .await
        {
            warn!("Kafka poll task failed: {}", e);
        }
    }

    fn in_flight(&self) -> usize {
        self.pending()
    }

    async fn flush(&self, timeout: Duration) -> usize {
        if self.pending() == 0 {
            return 0;
        }
        let producer = self.producer.clone();
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Kafka flush incomplete: {}", e),
            Err(e) => warn!("Kafka flush task failed: {}", e),
        }
        self.pending()
    }

    async fn close(&self) {
        let outstanding = self.pending();
        if outstanding > 0 {
            debug!(
                "Closing Kafka producer with {} undelivered message(s)",
                outstanding
            );
        }
    }
}
