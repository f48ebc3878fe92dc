use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

use sensor_relay::{
    broker::{stdout::StdoutClient, BrokerClient},
    config::{sensor::SensorKind, transport::TransportKind, Config, Overrides},
    core::{
        controller::{Controller, ControllerSettings},
        delivery::DeliveryTracker,
        encoder::{Message, Payload},
        lifecycle::{Lifecycle, LifecycleState},
    },
    sensor,
};
use tempfile::NamedTempFile;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const CONFIG: &str = r#"
[sampling]
interval_secs = 3600
idle_service_ms = 200

[publisher]
drain_timeout_ms = 2000

[sensor]
kind = "simulated"
tag = "bme280"

[transport]
kind = "stdout"
"#;

#[tokio::test(start_paused = true)]
async fn test_relay_publishes_json_lines_until_shutdown() {
    let file = write_config(CONFIG);
    let overrides = Overrides {
        address: Some("localhost:9092".into()),
        topic: Some("weather".into()),
        interval_secs: Some(1),
    };
    let config = Config::new(Some(file.path()), &overrides).unwrap();
    assert_eq!(config.transport.kind, TransportKind::Stdout);
    assert_eq!(config.sensor.kind, SensorKind::Simulated);
    assert_eq!(config.transport.topic, "weather");
    assert_eq!(config.sampling.interval_secs, 1);

    let reader = sensor::setup(&config.sensor).await.unwrap();
    let tracker = Arc::new(DeliveryTracker::new());
    let out = SharedBuffer::default();
    let client: Arc<dyn BrokerClient> =
        Arc::new(StdoutClient::with_writer(Box::new(out.clone()), tracker.clone()));

    let lifecycle = Lifecycle::new();
    let controller = Controller::new(
        reader,
        client,
        tracker.clone(),
        lifecycle.clone(),
        ControllerSettings::from_config(&config),
    );

    let (report, _) = tokio::join!(controller.run(), async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        lifecycle.request_shutdown();
    });

    assert_eq!(report.ticks, 3);
    assert_eq!(report.samples, 3);
    assert_eq!(report.enqueued, 3);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.undelivered, 0);
    assert_eq!(report.deliveries.delivered, 3);
    assert_eq!(tracker.stats(), report.deliveries);

    let lines = out.lines();
    assert_eq!(lines.len(), 3);
    for line in &lines {
        assert!(line.starts_with("{\"sensor\":\"bme280\", \"humidity\":"));
        let payload = Payload::decode(&Message::new(line.clone())).unwrap();
        assert_eq!(payload.sensor, "bme280");
        assert!(payload.timestamp > 0);
    }

    assert_eq!(lifecycle.current_state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(Config::new(Some(&missing), &Overrides::default()).is_err());
}

#[tokio::test]
async fn test_invalid_override_is_rejected() {
    let file = write_config(CONFIG);
    let overrides = Overrides {
        interval_secs: Some(0),
        ..Default::default()
    };
    assert!(Config::new(Some(file.path()), &overrides).is_err());
}

#[tokio::test]
async fn test_iio_sensor_absent_is_device_not_found() {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.sensor.kind = SensorKind::Iio;
    config.sensor.sysfs_root = root.path().to_path_buf();

    let result = sensor::setup(&config.sensor).await;
    assert!(matches!(
        result,
        Err(sensor::SensorError::DeviceNotFound { .. })
    ));
}
