//! Non-broker transport: one JSON line per message on standard output.
//!
//! Accepts the same address and topic as the broker transports but ignores
//! them. Each written line counts as delivered; its report is dispatched on
//! the next servicing call so the delivery path behaves like a real broker.

use std::{
    collections::VecDeque,
    io::{self, Write},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tracing::trace;

use super::{BrokerClient, EnqueueError};
use crate::core::delivery::{DeliveryReport, DeliveryTracker};

pub struct StdoutClient {
    out: Mutex<Box<dyn Write + Send>>,
    ready: Mutex<VecDeque<DeliveryReport>>,
    tracker: Arc<DeliveryTracker>,
}

impl StdoutClient {
    pub fn new(tracker: Arc<DeliveryTracker>) -> Self {
        Self::with_writer(Box::new(io::stdout()), tracker)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, tracker: Arc<DeliveryTracker>) -> Self {
        Self {
            out: Mutex::new(out),
            ready: Mutex::new(VecDeque::new()),
            tracker,
        }
    }

    fn ready(&self) -> MutexGuard<'_, VecDeque<DeliveryReport>> {
        self.ready.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl BrokerClient for StdoutClient {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn enqueue(&self, _topic: &str, payload: &[u8]) -> Result<(), EnqueueError> {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        out.write_all(payload)
            .and_then(|_| out.write_all(b"\n"))
            .and_then(|_| out.flush())
            .map_err(|e| EnqueueError::Rejected(format!("stdout write failed: {}", e)))?;
        drop(out);

        self.ready()
            .push_back(DeliveryReport::delivered(payload.len(), None));
        Ok(())
    }

    async fn service(&self, timeout: Duration) {
        let ready: Vec<DeliveryReport> = self.ready().drain(..).collect();
        if ready.is_empty() {
            if !timeout.is_zero() {
                tokio::time::sleep(timeout).await;
            }
            return;
        }
        trace!("Serving {} stdout delivery report(s)", ready.len());
        for report in &ready {
            self.tracker.on_delivery(report);
        }
    }

    fn in_flight(&self) -> usize {
        self.ready().len()
    }
}
