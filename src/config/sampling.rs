//! Cadence of the sampling loop and publisher retry/drain timing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::retry::RetryPolicy;

/// `[sampling]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between two ticks. Field deployments use tens of minutes.
    #[validate(range(min = 1, message = "Sampling interval must be at least 1 second"))]
    pub interval_secs: u64,

    /// Period of the non-blocking servicing calls made while waiting for the
    /// next tick, so delivery reports do not pile up across long gaps.
    #[validate(range(
        min = 10,
        max = 60000,
        message = "Idle service period must be between 10 and 60000 ms"
    ))]
    pub idle_service_ms: u64,
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_service(&self) -> Duration {
        Duration::from_millis(self.idle_service_ms)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            interval_secs: 1800,
            idle_service_ms: 1000,
        }
    }
}

/// `[publisher]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PublisherConfig {
    /// Wait between two enqueue attempts while the client queue is full.
    #[validate(range(
        min = 1,
        max = 60000,
        message = "Retry interval must be between 1 and 60000 ms"
    ))]
    pub retry_interval_ms: u64,

    /// Cap on Queue-Full retries. Unset retries until the queue drains.
    pub max_retries: Option<u32>,

    /// Upper bound on the final flush at shutdown.
    #[validate(range(max = 600000, message = "Drain timeout must not exceed 600000 ms"))]
    pub drain_timeout_ms: u64,
}

impl PublisherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::constant(Duration::from_millis(self.retry_interval_ms), self.max_retries)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            retry_interval_ms: 1000,
            max_retries: None,
            drain_timeout_ms: 10000,
        }
    }
}
