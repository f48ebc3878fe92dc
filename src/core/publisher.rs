//! Backpressure-aware publishing.
//!
//! [`Publisher`] reconciles the synchronous "send this sample now" call site
//! with an asynchronous, queue-bounded broker client:
//!
//! ```text
//! publish(message)
//!   ├─ empty body ──────────────► service(0) ──► Enqueued
//!   └─ enqueue(copy of bytes)
//!        ├─ accepted ───────────► service(0) ──► Enqueued
//!        ├─ queue full ─────────► service(retry interval) ─► enqueue again
//!        └─ other error ────────► service(0) ──► Rejected (message dropped)
//! ```
//!
//! The Queue-Full loop follows a [`RetryPolicy`]. The default policy is
//! unbounded: the sampling loop is throttled to the broker's throughput and
//! nothing is dropped, but a permanently saturated queue stalls sampling. A
//! capped policy turns that stall into [`PublishError::RetriesExhausted`].
//!
//! A shutdown request does not abandon the message. It fixes the drain
//! deadline (now + drain timeout) and the loop keeps retrying until that
//! deadline, after which the message is dropped with
//! [`PublishError::Cancelled`]. The same deadline bounds the final
//! [`drain`](Publisher::drain), so shutdown costs one drain budget in total.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{encoder::Message, retry::RetryPolicy};
use crate::broker::{BrokerClient, EnqueueError};

/// Successful hand-off of a message to the broker client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// Bytes handed to the client; zero for an empty message.
    pub bytes: usize,
    /// Enqueue calls made, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The client refused the message for a reason other than congestion.
    #[error("Failed to produce to topic {topic}: {reason}")]
    Rejected { topic: String, reason: String },

    /// A capped retry policy ran out while the queue stayed full.
    #[error("Queue still full after {attempts} attempts, message dropped")]
    RetriesExhausted { attempts: u32 },

    /// The drain deadline passed while the queue was still full.
    #[error("Drain timeout elapsed after {attempts} attempts with the queue still full, message dropped")]
    Cancelled { attempts: u32 },
}

/// Single-writer publisher over a [`BrokerClient`].
///
/// Not `Clone`: exactly one task drives the client through it.
pub struct Publisher {
    client: Arc<dyn BrokerClient>,
    topic: String,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    drain_timeout: Duration,
    drain_deadline: Mutex<Option<Instant>>,
}

impl Publisher {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        topic: impl Into<String>,
        retry: RetryPolicy,
        shutdown: CancellationToken,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            client,
            topic: topic.into(),
            retry,
            shutdown,
            drain_timeout,
            drain_deadline: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Instant by which all shutdown work must finish. Fixed on first call.
    pub fn drain_deadline(&self) -> Instant {
        *self
            .drain_deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_or_insert_with(|| Instant::now() + self.drain_timeout)
    }

    /// Hands `message` to the broker client, retrying while its queue is full.
    pub async fn publish(&self, message: &Message) -> Result<Enqueued, PublishError> {
        if message.is_empty() {
            // Nothing to send, only serve delivery reports.
            self.client.service(Duration::ZERO).await;
            return Ok(Enqueued {
                bytes: 0,
                attempts: 0,
            });
        }

        let mut backoff = self.retry.backoff();
        let mut attempts: u32 = 0;

        let result = loop {
            attempts += 1;
            match self.client.enqueue(&self.topic, message.as_bytes()) {
                Ok(()) => {
                    info!(
                        "Enqueued message ({} bytes) for topic {}",
                        message.len(),
                        self.topic
                    );
                    break Ok(Enqueued {
                        bytes: message.len(),
                        attempts,
                    });
                }
                Err(EnqueueError::QueueFull) => {
                    warn!(
                        "Failed to produce to topic {}: {}",
                        self.topic,
                        EnqueueError::QueueFull
                    );
                    let wait = match backoff.next_sleep() {
                        Ok(wait) => wait,
                        Err(e) => {
                            error!("Giving up on message for topic {}: {}", self.topic, e);
                            break Err(PublishError::RetriesExhausted { attempts });
                        }
                    };
                    debug!(
                        "Serving delivery reports for up to {} ms before retry #{}",
                        wait.as_millis(),
                        backoff.attempt()
                    );
                    if self.shutdown.is_cancelled() {
                        let now = Instant::now();
                        let deadline = self.drain_deadline();
                        if now >= deadline {
                            warn!(
                                "Drain timeout elapsed while queue is full, dropping message for topic {}",
                                self.topic
                            );
                            break Err(PublishError::Cancelled { attempts });
                        }
                        self.client.service(wait.min(deadline - now)).await;
                        continue;
                    }
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            let left = self.drain_deadline().saturating_duration_since(Instant::now());
                            warn!(
                                "Shutdown requested while queue is full, retrying for up to {} ms",
                                left.as_millis()
                            );
                        }
                        _ = self.client.service(wait) => {}
                    }
                }
                Err(EnqueueError::Rejected(reason)) => {
                    let err = PublishError::Rejected {
                        topic: self.topic.clone(),
                        reason,
                    };
                    error!("{}", err);
                    break Err(err);
                }
            }
        };

        self.client.service(Duration::ZERO).await;
        result
    }

    /// Non-blocking pass over ready delivery reports.
    pub async fn poll(&self) {
        self.client.service(Duration::ZERO).await;
    }

    /// Waits up to `timeout` for in-flight messages to be reported.
    /// Returns how many are still outstanding.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let in_flight = self.client.in_flight();
        debug!(
            "Draining {} in-flight message(s), timeout {} ms",
            in_flight,
            timeout.as_millis()
        );
        self.client.flush(timeout).await
    }

    pub fn in_flight(&self) -> usize {
        self.client.in_flight()
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{broker::mock::MockClient, core::delivery::DeliveryTracker};

    fn setup(retry: RetryPolicy) -> (Arc<MockClient>, Arc<DeliveryTracker>, Publisher, CancellationToken) {
        setup_with_drain(retry, Duration::from_secs(10))
    }

    fn setup_with_drain(
        retry: RetryPolicy,
        drain_timeout: Duration,
    ) -> (Arc<MockClient>, Arc<DeliveryTracker>, Publisher, CancellationToken) {
        let tracker = Arc::new(DeliveryTracker::new());
        let client = Arc::new(MockClient::new(tracker.clone()));
        let token = CancellationToken::new();
        let publisher =
            Publisher::new(client.clone(), "weather", retry, token.clone(), drain_timeout);
        (client, tracker, publisher, token)
    }

    fn message() -> Message {
        Message::new("{\"sensor\":\"bme280\", \"humidity\":40.00}")
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_accepted() {
        let (client, tracker, publisher, _) = setup(RetryPolicy::default());

        let enqueued = publisher.publish(&message()).await.unwrap();
        assert_eq!(
            enqueued,
            Enqueued {
                bytes: message().len(),
                attempts: 1
            }
        );
        assert_eq!(client.accepted()[0].0, "weather");
        assert_eq!(client.accepted()[0].1, message().as_bytes());
        // The trailing non-blocking service already dispatched the report.
        assert_eq!(client.service_calls(), vec![Duration::ZERO]);
        assert_eq!(tracker.stats().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_message_skips_enqueue() {
        let (client, _, publisher, _) = setup(RetryPolicy::default());

        let enqueued = publisher.publish(&Message::default()).await.unwrap();
        assert_eq!(enqueued.bytes, 0);
        assert_eq!(client.enqueue_calls(), 0);
        assert_eq!(client.service_calls(), vec![Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_retries_until_accepted() {
        const N: usize = 3;
        let (client, _, publisher, _) = setup(RetryPolicy::default());
        client.script(std::iter::repeat(Err(EnqueueError::QueueFull)).take(N));

        let start = Instant::now();
        let enqueued = publisher.publish(&message()).await.unwrap();

        assert_eq!(enqueued.attempts, N as u32 + 1);
        assert_eq!(client.enqueue_calls(), N + 1);
        assert_eq!(client.accepted().len(), 1);
        assert!(start.elapsed() >= Duration::from_millis(1000) * N as u32);

        let calls = client.service_calls();
        assert_eq!(calls.len(), N + 1);
        assert!(calls[..N].iter().all(|d| *d == Duration::from_millis(1000)));
        assert_eq!(calls[N], Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_serves_earlier_reports_while_waiting() {
        let (client, tracker, publisher, _) = setup(RetryPolicy::default());
        client.hold_reports(true);
        publisher.publish(&message()).await.unwrap();
        assert_eq!(tracker.stats().delivered, 0);

        client.hold_reports(false);
        client.script([Err(EnqueueError::QueueFull)]);
        publisher.publish(&message()).await.unwrap();

        assert_eq!(tracker.stats().delivered, 2);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_gives_up() {
        let (client, _, publisher, _) =
            setup(RetryPolicy::constant(Duration::from_millis(1000), Some(2)));
        client.script(std::iter::repeat(Err(EnqueueError::QueueFull)).take(10));

        let err = publisher.publish(&message()).await.unwrap_err();
        assert_eq!(err, PublishError::RetriesExhausted { attempts: 3 });
        assert_eq!(client.enqueue_calls(), 3);
        assert!(client.accepted().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejected_is_not_retried() {
        let (client, _, publisher, _) = setup(RetryPolicy::default());
        client.script([Err(EnqueueError::Rejected(
            "Broker: Unknown topic or partition".into(),
        ))]);

        let err = publisher.publish(&message()).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected { .. }));
        assert_eq!(client.enqueue_calls(), 1);
        assert_eq!(client.service_calls(), vec![Duration::ZERO]);
        assert!(logs_contain(
            "Failed to produce to topic weather: Broker: Unknown topic or partition"
        ));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_shutdown_during_queue_full_keeps_retrying_until_accepted() {
        let (client, tracker, publisher, token) = setup(RetryPolicy::default());
        client.script(std::iter::repeat(Err(EnqueueError::QueueFull)).take(3));

        let msg = message();
        let start = Instant::now();
        let (result, _) = tokio::join!(publisher.publish(&msg), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        });

        assert_eq!(
            result,
            Ok(Enqueued {
                bytes: msg.len(),
                attempts: 4
            })
        );
        assert_eq!(client.accepted().len(), 1);
        assert_eq!(tracker.stats().delivered, 1);
        assert!(start.elapsed() >= Duration::from_millis(2500));
        assert!(start.elapsed() < Duration::from_millis(3000));
        assert!(publisher.drain_deadline() >= start + Duration::from_millis(10_500));
        assert!(logs_contain("Shutdown requested while queue is full, retrying for up to 10000 ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_bounds_queue_full_wait_after_shutdown() {
        let (client, _, publisher, token) =
            setup_with_drain(RetryPolicy::default(), Duration::from_secs(2));
        client.script(std::iter::repeat(Err(EnqueueError::QueueFull)).take(1000));

        let msg = message();
        let start = Instant::now();
        let (result, _) = tokio::join!(publisher.publish(&msg), async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            token.cancel();
        });

        // Attempts at 0, 1, 2 s, at the shutdown (2.5 s), at 3.5 s and at
        // the deadline (4.5 s).
        assert_eq!(result, Err(PublishError::Cancelled { attempts: 6 }));
        assert_eq!(client.enqueue_calls(), 6);
        assert!(start.elapsed() >= Duration::from_millis(4500));
        assert!(start.elapsed() < Duration::from_millis(5000));
        // The message is dropped but the trailing service call still runs.
        assert_eq!(client.service_calls().last(), Some(&Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_after_deadline_gives_up_on_first_queue_full() {
        let (client, _, publisher, token) =
            setup_with_drain(RetryPolicy::default(), Duration::from_secs(1));
        token.cancel();
        let deadline = publisher.drain_deadline();
        tokio::time::sleep_until(deadline).await;

        client.script([Err(EnqueueError::QueueFull)]);
        let result = publisher.publish(&message()).await;
        assert_eq!(result, Err(PublishError::Cancelled { attempts: 1 }));
        assert_eq!(client.service_calls(), vec![Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_reports_outstanding() {
        let (client, _, publisher, _) = setup(RetryPolicy::default());
        client.hold_reports(true);
        publisher.publish(&message()).await.unwrap();
        publisher.publish(&message()).await.unwrap();

        assert_eq!(publisher.in_flight(), 2);
        assert_eq!(publisher.drain(Duration::from_secs(10)).await, 2);

        client.hold_reports(false);
        assert_eq!(publisher.drain(Duration::from_secs(10)).await, 0);
    }
}
