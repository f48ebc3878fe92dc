//! The sampling loop and its shutdown sequence.
//!
//! ```text
//! Running:   tick ─► read sensor ─► encode ─► publish ─► idle until next tick
//!               ▲                                              │
//!               └──────────────────────────────────────────────┘
//!            (shutdown request interrupts the idle wait or the Queue-Full wait)
//! Draining:  flush in-flight messages, bounded by the drain timeout
//! Stopped:   report undelivered count and the run summary
//! ```

use std::{fmt, sync::Arc, time::Duration};

use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::{
    delivery::{DeliveryStats, DeliveryTracker},
    encoder::Encoder,
    lifecycle::{Lifecycle, LifecycleState},
    publisher::Publisher,
    retry::RetryPolicy,
};
use crate::{broker::BrokerClient, config::Config, sensor::SensorReader};

/// Timing and addressing used by the [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub topic: String,
    pub tag: String,
    pub interval: Duration,
    /// Period of non-blocking servicing calls while waiting for the next tick.
    pub idle_service: Duration,
    pub retry: RetryPolicy,
    pub drain_timeout: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topic: config.transport.topic.clone(),
            tag: config.sensor.tag.clone(),
            interval: config.sampling.interval(),
            idle_service: config.sampling.idle_service(),
            retry: config.publisher.retry_policy(),
            drain_timeout: config.publisher.drain_timeout(),
        }
    }
}

/// Counters for one complete run, logged when the relay stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ticks: u64,
    pub samples: u64,
    pub sensor_failures: u64,
    pub enqueued: u64,
    /// Messages rejected, abandoned on shutdown, or out of retries.
    pub dropped: u64,
    pub deliveries: DeliveryStats,
    /// Still in flight when the drain timeout elapsed.
    pub undelivered: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sample(s) in {} tick(s), {} sensor failure(s), {} enqueued, {} dropped, {}, {} undelivered",
            self.samples,
            self.ticks,
            self.sensor_failures,
            self.enqueued,
            self.dropped,
            self.deliveries,
            self.undelivered
        )
    }
}

/// Owns the sampling cadence and drives the publisher from a single task.
pub struct Controller {
    sensor: Arc<dyn SensorReader>,
    encoder: Encoder,
    publisher: Publisher,
    tracker: Arc<DeliveryTracker>,
    lifecycle: Lifecycle,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        sensor: Arc<dyn SensorReader>,
        client: Arc<dyn BrokerClient>,
        tracker: Arc<DeliveryTracker>,
        lifecycle: Lifecycle,
        settings: ControllerSettings,
    ) -> Self {
        let publisher = Publisher::new(
            client,
            settings.topic.clone(),
            settings.retry,
            lifecycle.shutdown_token(),
            settings.drain_timeout,
        );
        Self {
            sensor,
            encoder: Encoder::new(&settings.tag),
            publisher,
            tracker,
            lifecycle,
            settings,
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Samples until shutdown is requested, then drains and stops.
    pub async fn run(self) -> RunReport {
        let mut report = RunReport::default();

        info!(
            "Sampling started (interval: {}s, sensor: {}, topic: {})",
            self.settings.interval.as_secs(),
            self.sensor.name(),
            self.publisher.topic()
        );

        while !self.lifecycle.is_shutdown_requested() {
            let start = Instant::now();
            self.tick(&mut report).await;

            if !self.idle_until(start + self.settings.interval).await {
                break;
            }
        }

        self.shutdown(report).await
    }

    async fn tick(&self, report: &mut RunReport) {
        report.ticks += 1;
        info!("Tick #{} at {}", report.ticks, wall_clock());

        let sample = match self.sensor.read_sample().await {
            Ok(sample) => sample,
            Err(e) => {
                report.sensor_failures += 1;
                error!("Failed to read sensor {}: {}", self.sensor.name(), e);
                self.publisher.poll().await;
                return;
            }
        };
        report.samples += 1;

        let message = self.encoder.encode(&sample);
        debug!("Encoded sample: {}", message);

        match self.publisher.publish(&message).await {
            Ok(enqueued) if enqueued.bytes > 0 => report.enqueued += 1,
            Ok(_) => {}
            Err(e) => {
                report.dropped += 1;
                debug!("Message dropped: {}", e);
            }
        }
    }

    /// Serves delivery reports until `deadline`. Returns `false` if shutdown
    /// was requested first.
    async fn idle_until(&self, deadline: Instant) -> bool {
        let serve = async {
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                sleep_until((now + self.settings.idle_service).min(deadline)).await;
                self.publisher.poll().await;
            }
        };

        tokio::select! {
            biased;
            _ = self.lifecycle.shutdown_requested() => false,
            _ = serve => true,
        }
    }

    async fn shutdown(self, mut report: RunReport) -> RunReport {
        if let Err(e) = self.lifecycle.advance(LifecycleState::Draining) {
            warn!("{}", e);
        }

        info!("Flushing final messages..");
        // A Queue-Full retry interrupted by the shutdown may already have
        // spent part of the budget.
        let remaining = self
            .publisher
            .drain_deadline()
            .saturating_duration_since(Instant::now());
        let undelivered = self.publisher.drain(remaining).await;
        if undelivered > 0 {
            warn!("{} message(s) were not delivered", undelivered);
        }
        self.publisher.close().await;

        if let Err(e) = self.lifecycle.advance(LifecycleState::Stopped) {
            warn!("{}", e);
        }

        report.undelivered = undelivered;
        report.deliveries = self.tracker.stats();
        info!("Run summary: {}", report);
        report
    }
}

fn wall_clock() -> String {
    time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
        ))
        .unwrap_or_default()
}
