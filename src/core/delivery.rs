//! Delivery outcome tracking.
//!
//! Broker clients hand every final outcome of an enqueued message to the
//! [`DeliveryTracker`] from inside their servicing call. The tracker only
//! logs and counts; it never influences the publisher or the sampling loop.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{error, info};

/// Final outcome of one enqueued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub success: bool,
    pub error: Option<String>,
    pub bytes: usize,
    pub partition: Option<i32>,
}

impl DeliveryReport {
    pub fn delivered(bytes: usize, partition: Option<i32>) -> Self {
        Self {
            success: true,
            error: None,
            bytes,
            partition,
        }
    }

    pub fn failed(bytes: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            bytes,
            partition: None,
        }
    }
}

/// Snapshot of the tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
}

impl fmt::Display for DeliveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} delivered, {} failed", self.delivered, self.failed)
    }
}

/// Receives delivery reports.
///
/// Runs on whatever thread performs the broker client's servicing call, so it
/// must stay cheap: one log line and one counter increment.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one report. The report is only borrowed for the call.
    pub fn on_delivery(&self, report: &DeliveryReport) {
        if report.success {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            match report.partition {
                Some(partition) => info!(
                    "Message delivered ({} bytes, partition {})",
                    report.bytes, partition
                ),
                None => info!("Message delivered ({} bytes)", report.bytes),
            }
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                "Message delivery failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
