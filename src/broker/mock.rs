//! Scriptable in-memory client used by unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use super::{BrokerClient, EnqueueError};
use crate::core::delivery::{DeliveryReport, DeliveryTracker};

#[derive(Default)]
struct State {
    script: VecDeque<Result<(), EnqueueError>>,
    enqueue_calls: usize,
    accepted: Vec<(String, Vec<u8>)>,
    pending: VecDeque<DeliveryReport>,
    service_calls: Vec<Duration>,
    hold_reports: bool,
    fail_deliveries: bool,
}

pub(crate) struct MockClient {
    tracker: Arc<DeliveryTracker>,
    state: Mutex<State>,
}

impl MockClient {
    pub(crate) fn new(tracker: Arc<DeliveryTracker>) -> Self {
        Self {
            tracker,
            state: Mutex::new(State::default()),
        }
    }

    /// Queues results returned by the next enqueue calls, in order.
    /// Once exhausted, enqueue accepts.
    pub(crate) fn script(&self, results: impl IntoIterator<Item = Result<(), EnqueueError>>) {
        self.state.lock().unwrap().script.extend(results);
    }

    pub(crate) fn hold_reports(&self, hold: bool) {
        self.state.lock().unwrap().hold_reports = hold;
    }

    pub(crate) fn fail_deliveries(&self, fail: bool) {
        self.state.lock().unwrap().fail_deliveries = fail;
    }

    pub(crate) fn enqueue_calls(&self) -> usize {
        self.state.lock().unwrap().enqueue_calls
    }

    pub(crate) fn accepted(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().accepted.clone()
    }

    pub(crate) fn service_calls(&self) -> Vec<Duration> {
        self.state.lock().unwrap().service_calls.clone()
    }
}

#[async_trait::async_trait]
impl BrokerClient for MockClient {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), EnqueueError> {
        let mut state = self.state.lock().unwrap();
        state.enqueue_calls += 1;
        if let Some(result) = state.script.pop_front() {
            result?;
        }
        state.accepted.push((topic.to_string(), payload.to_vec()));
        let report = if state.fail_deliveries {
            DeliveryReport::failed(payload.len(), "Broker: Message size too large")
        } else {
            DeliveryReport::delivered(payload.len(), Some(0))
        };
        state.pending.push_back(report);
        Ok(())
    }

    async fn service(&self, timeout: Duration) {
        let ready: Vec<DeliveryReport> = {
            let mut state = self.state.lock().unwrap();
            state.service_calls.push(timeout);
            if state.hold_reports {
                Vec::new()
            } else {
                state.pending.drain(..).collect()
            }
        };

        if ready.is_empty() {
            if !timeout.is_zero() {
                tokio::time::sleep(timeout).await;
            }
            return;
        }
        for report in &ready {
            self.tracker.on_delivery(report);
        }
    }

    fn in_flight(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}
