//! MQTT transport over `rumqttc`.
//!
//! ```text
//! enqueue ──try_publish──► request channel (bounded) ──► EventLoop ──► broker
//!    │                          full = Queue Full           │
//!    └─ ledger: unsent lengths                              │
//!                                                   driver task
//!         Outgoing::Publish(pkid) ─► awaiting[pkid]   (QoS 0: reported at once)
//!         PubAck / PubComp(pkid)  ─► report ─► mpsc ─► service() ─► DeliveryTracker
//! ```
//!
//! The event loop runs on its own task, reconnecting with exponential backoff
//! on transient errors. Reports are only handed to the tracker from
//! [`BrokerClient::service`], on the application's task.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS,
};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{BrokerClient, BrokerError, EnqueueError};
use crate::{
    config::transport::MqttConfig,
    core::{
        delivery::{DeliveryReport, DeliveryTracker},
        retry::Backoff,
    },
};

const DEFAULT_PORT: u16 = 1883;

/// Longest wait for the DISCONNECT packet to go out on close.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Splits `host[:port]`, optionally prefixed with `mqtt://` or `tcp://`.
/// IPv6 literals must be bracketed: `[::1]:1883`.
pub fn parse_address(address: &str) -> Result<(String, u16), BrokerError> {
    let invalid = |reason: &str| BrokerError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let rest = address
        .strip_prefix("mqtt://")
        .or_else(|| address.strip_prefix("tcp://"))
        .unwrap_or(address)
        .trim_end_matches('/');

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(invalid("unexpected text after IPv6 literal")),
        }
    } else {
        match rest.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (rest, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid("port must be a number between 1 and 65535"))?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

/// Publish topics may not contain wildcards or NUL.
pub fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        return Err(BrokerError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Byte lengths of messages between enqueue and acknowledgement.
#[derive(Debug)]
struct Ledger {
    qos: QoS,
    /// Accepted by the client, not yet written to the network. FIFO.
    unsent: VecDeque<usize>,
    /// Written with QoS 1/2, waiting for PUBACK/PUBCOMP.
    awaiting: HashMap<u16, usize>,
}

impl Ledger {
    fn new(qos: QoS) -> Self {
        Self {
            qos,
            unsent: VecDeque::new(),
            awaiting: HashMap::new(),
        }
    }

    fn on_enqueued(&mut self, bytes: usize) {
        self.unsent.push_back(bytes);
    }

    /// A PUBLISH went out. Returns the report for QoS 0.
    fn on_publish_sent(&mut self, pkid: u16) -> Option<DeliveryReport> {
        if self.qos != QoS::AtMostOnce && self.awaiting.contains_key(&pkid) {
            trace!("Retransmitted publish (pkid {})", pkid);
            return None;
        }
        let Some(bytes) = self.unsent.pop_front() else {
            trace!("Outgoing publish (pkid {}) not issued by this client", pkid);
            return None;
        };
        if self.qos == QoS::AtMostOnce {
            Some(DeliveryReport::delivered(bytes, None))
        } else {
            self.awaiting.insert(pkid, bytes);
            None
        }
    }

    /// Final acknowledgement for `pkid` arrived.
    fn on_acknowledged(&mut self, pkid: u16) -> Option<DeliveryReport> {
        self.awaiting
            .remove(&pkid)
            .map(|bytes| DeliveryReport::delivered(bytes, None))
    }

    /// Fails every outstanding message, e.g. when the driver gives up.
    fn fail_all(&mut self, reason: &str) -> Vec<DeliveryReport> {
        self.awaiting
            .drain()
            .map(|(_, bytes)| bytes)
            .chain(self.unsent.drain(..))
            .map(|bytes| DeliveryReport::failed(bytes, reason))
            .collect()
    }
}

#[derive(Debug)]
struct Shared {
    ledger: Mutex<Ledger>,
    in_flight: AtomicUsize,
    alive: AtomicBool,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        // TLS and future variants: prefer reconnecting.
        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

/// Translates one event-loop event into zero or one delivery reports.
fn on_event(ledger: &mut Ledger, event: &Event) -> Option<DeliveryReport> {
    match event {
        Event::Outgoing(Outgoing::Publish(pkid)) => ledger.on_publish_sent(*pkid),
        Event::Incoming(Packet::PubAck(ack)) if ledger.qos == QoS::AtLeastOnce => {
            ledger.on_acknowledged(ack.pkid)
        }
        Event::Incoming(Packet::PubComp(comp)) if ledger.qos == QoS::ExactlyOnce => {
            ledger.on_acknowledged(comp.pkid)
        }
        _ => None,
    }
}

/// Owns the `EventLoop`; runs until cancelled or a fatal error.
struct Driver {
    event_loop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        debug!("MQTT event loop driver started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.disconnect().await;
                    break;
                }
                polled = self.event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        if !self.recover(e).await {
                            break;
                        }
                    }
                }
            }
        }
        self.shared.alive.store(false, Ordering::Release);
        self.fail_outstanding("MQTT client stopped before acknowledgement");
        debug!("MQTT event loop driver stopped");
    }

    fn handle_event(&mut self, event: Event) {
        if let Event::Incoming(Packet::ConnAck(ack)) = &event {
            if ack.code == ConnectReturnCode::Success {
                info!("Connected to MQTT broker");
                self.backoff.reset();
            }
            return;
        }
        if let Event::Incoming(Packet::Disconnect) = &event {
            warn!("Disconnected by broker");
            return;
        }

        let report = on_event(&mut self.shared.ledger(), &event);
        if let Some(report) = report {
            // A closed receiver means the client is gone; nothing left to report to.
            let _ = self.reports.send(report);
        }
    }

    /// Waits out the backoff after a connection error. Returns `false` when
    /// the driver must stop.
    async fn recover(&mut self, e: ConnectionError) -> bool {
        if classify_connection_error(&e) == Disposition::Fatal {
            error!("Fatal MQTT connection error: {}", e);
            return false;
        }
        let delay = match self.backoff.next_sleep() {
            Ok(delay) => delay,
            Err(retry) => {
                error!("Giving up on MQTT broker: {} (last error: {})", retry, e);
                return false;
            }
        };
        warn!(
            "MQTT connection error: {}. Reconnecting in {:.2} seconds",
            e,
            delay.as_secs_f64()
        );
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Could not queue MQTT disconnect: {}", e);
            return;
        }
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(event) => self.handle_event(event),
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!("MQTT disconnect not flushed within {:?}", DISCONNECT_GRACE);
        }
    }

    fn fail_outstanding(&self, reason: &str) {
        for report in self.shared.ledger().fail_all(reason) {
            let _ = self.reports.send(report);
        }
    }
}

pub struct MqttClient {
    client: AsyncClient,
    qos: QoS,
    retain: bool,
    shared: Arc<Shared>,
    reports: AsyncMutex<mpsc::UnboundedReceiver<DeliveryReport>>,
    tracker: Arc<DeliveryTracker>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Builds the client and spawns the event-loop driver. The TCP connection
    /// is established in the background; this only fails on bad settings.
    pub fn connect(
        address: &str,
        topic: &str,
        config: &MqttConfig,
        tracker: Arc<DeliveryTracker>,
    ) -> Result<Self, BrokerError> {
        let (host, port) = parse_address(address)?;
        validate_topic(topic)?;
        if config.password.is_some() && config.username.is_none() {
            return Err(BrokerError::Config(
                "MQTT password is set but username is missing".into(),
            ));
        }

        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(config.clean_session);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, config.queue_capacity);
        let qos = qos_level(config.qos);
        let shared = Arc::new(Shared {
            ledger: Mutex::new(Ledger::new(qos)),
            in_flight: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
        });
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let driver = Driver {
            event_loop,
            client: client.clone(),
            shared: shared.clone(),
            reports: reports_tx,
            backoff: config.reconnect_policy().backoff(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(driver.run());

        info!(
            "MQTT client '{}' targeting {}:{} (QoS {}, queue capacity {})",
            config.client_id, host, port, config.qos, config.queue_capacity
        );

        Ok(Self {
            client,
            qos,
            retain: config.retain,
            shared,
            reports: AsyncMutex::new(reports_rx),
            tracker,
            cancel,
            driver: Mutex::new(Some(handle)),
        })
    }

    fn dispatch(&self, report: &DeliveryReport) {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.tracker.on_delivery(report);
    }
}

#[async_trait::async_trait]
impl BrokerClient for MqttClient {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), EnqueueError> {
        // Held across try_publish so the driver cannot see the PUBLISH before
        // its length is recorded, nor fail the ledger in between.
        let mut ledger = self.shared.ledger();
        if !self.shared.alive.load(Ordering::Acquire) {
            return Err(EnqueueError::Rejected("MQTT event loop has stopped".into()));
        }
        match self
            .client
            .try_publish(topic, self.qos, self.retain, payload.to_vec())
        {
            Ok(()) => {
                ledger.on_enqueued(payload.len());
                self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(ClientError::TryRequest(_)) if self.shared.alive.load(Ordering::Acquire) => {
                Err(EnqueueError::QueueFull)
            }
            Err(e) => Err(EnqueueError::Rejected(e.to_string())),
        }
    }

    async fn service(&self, timeout: Duration) {
        let mut reports = self.reports.lock().await;
        let mut served = 0usize;

        while let Ok(report) = reports.try_recv() {
            self.dispatch(&report);
            served += 1;
        }
        if served > 0 || timeout.is_zero() {
            return;
        }

        match tokio::time::timeout(timeout, reports.recv()).await {
            Ok(Some(report)) => {
                self.dispatch(&report);
                while let Ok(report) = reports.try_recv() {
                    self.dispatch(&report);
                }
            }
            // Driver gone and nothing left: behave like an idle wait.
            Ok(None) => tokio::time::sleep(timeout).await,
            Err(_) => {}
        }
    }

    fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("MQTT driver task failed: {}", e);
            }
        }
        debug!("MQTT client closed");
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::{PubAck, PubComp};

    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("localhost").unwrap(), ("localhost".into(), 1883));
        assert_eq!(
            parse_address("broker.local:8883").unwrap(),
            ("broker.local".into(), 8883)
        );
        assert_eq!(
            parse_address("mqtt://10.0.0.5:1884/").unwrap(),
            ("10.0.0.5".into(), 1884)
        );
        assert_eq!(parse_address("[::1]:1885").unwrap(), ("::1".into(), 1885));
        assert_eq!(parse_address("[fe80::1]").unwrap(), ("fe80::1".into(), 1883));

        assert!(parse_address("").is_err());
        assert!(parse_address(":1883").is_err());
        assert!(parse_address("host:notaport").is_err());
        assert!(parse_address("host:0").is_err());
        assert!(parse_address("[::1").is_err());
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("weather/garden").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("weather/+").is_err());
        assert!(validate_topic("weather/#").is_err());
    }

    #[test]
    fn test_ledger_qos1_settles_on_puback() {
        let mut ledger = Ledger::new(QoS::AtLeastOnce);
        ledger.on_enqueued(100);
        ledger.on_enqueued(120);

        assert_eq!(on_event(&mut ledger, &Event::Outgoing(Outgoing::Publish(1))), None);
        assert_eq!(on_event(&mut ledger, &Event::Outgoing(Outgoing::Publish(2))), None);
        // Retransmission after reconnect does not consume another length.
        assert_eq!(on_event(&mut ledger, &Event::Outgoing(Outgoing::Publish(1))), None);
        assert!(ledger.unsent.is_empty());

        let report = on_event(&mut ledger, &Event::Incoming(Packet::PubAck(PubAck::new(2))));
        assert_eq!(report, Some(DeliveryReport::delivered(120, None)));
        let report = on_event(&mut ledger, &Event::Incoming(Packet::PubAck(PubAck::new(1))));
        assert_eq!(report, Some(DeliveryReport::delivered(100, None)));

        // Duplicate ack is ignored.
        assert_eq!(
            on_event(&mut ledger, &Event::Incoming(Packet::PubAck(PubAck::new(1)))),
            None
        );
    }

    #[test]
    fn test_ledger_qos0_reports_when_written() {
        let mut ledger = Ledger::new(QoS::AtMostOnce);
        ledger.on_enqueued(64);
        let report = on_event(&mut ledger, &Event::Outgoing(Outgoing::Publish(0)));
        assert_eq!(report, Some(DeliveryReport::delivered(64, None)));
    }

    #[test]
    fn test_ledger_qos2_waits_for_pubcomp() {
        let mut ledger = Ledger::new(QoS::ExactlyOnce);
        ledger.on_enqueued(80);
        assert_eq!(on_event(&mut ledger, &Event::Outgoing(Outgoing::Publish(7))), None);
        assert_eq!(
            on_event(&mut ledger, &Event::Incoming(Packet::PubAck(PubAck::new(7)))),
            None
        );
        let report = on_event(&mut ledger, &Event::Incoming(Packet::PubComp(PubComp::new(7))));
        assert_eq!(report, Some(DeliveryReport::delivered(80, None)));
    }

    #[test]
    fn test_ledger_fail_all() {
        let mut ledger = Ledger::new(QoS::AtLeastOnce);
        ledger.on_enqueued(10);
        ledger.on_enqueued(20);
        on_event(&mut ledger, &Event::Outgoing(Outgoing::Publish(1)));

        let reports = ledger.fail_all("stopped");
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| !r.success));
        assert!(ledger.unsent.is_empty() && ledger.awaiting.is_empty());
    }

    #[test]
    fn test_error_classification() {
        use std::io;

        let refused = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(classify_connection_error(&refused), Disposition::Reconnect);

        let denied = ConnectionError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert_eq!(classify_connection_error(&denied), Disposition::Fatal);

        let bad_auth = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert_eq!(classify_connection_error(&bad_auth), Disposition::Fatal);

        let busy = ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable);
        assert_eq!(classify_connection_error(&busy), Disposition::Reconnect);

        assert_eq!(
            classify_connection_error(&ConnectionError::NetworkTimeout),
            Disposition::Reconnect
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_wildcard_topic() {
        let result = MqttClient::connect(
            "localhost",
            "weather/#",
            &MqttConfig::default(),
            Arc::new(DeliveryTracker::new()),
        );
        assert!(matches!(result, Err(BrokerError::InvalidTopic(_))));
    }

    #[tokio::test]
    async fn test_connect_and_close_without_broker() {
        let client = MqttClient::connect(
            "127.0.0.1:1",
            "weather",
            &MqttConfig::default(),
            Arc::new(DeliveryTracker::new()),
        )
        .unwrap();
        assert_eq!(client.name(), "mqtt");
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.flush(Duration::from_millis(50)).await, 0);
        client.close().await;
        assert!(!client.shared.alive.load(Ordering::Acquire));
    }
}
