//! Broker transport selection and per-transport options.

use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::retry::RetryPolicy;

/// Which [`BrokerClient`](crate::broker::BrokerClient) implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Kafka,
    Mqtt,
    Stdout,
}

impl Default for TransportKind {
    /// The richest transport compiled into this build.
    fn default() -> Self {
        if cfg!(feature = "kafka") {
            TransportKind::Kafka
        } else if cfg!(feature = "mqtt") {
            TransportKind::Mqtt
        } else {
            TransportKind::Stdout
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Kafka => f.write_str("kafka"),
            TransportKind::Mqtt => f.write_str("mqtt"),
            TransportKind::Stdout => f.write_str("stdout"),
        }
    }
}

/// `[transport]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,

    /// Broker address: a bootstrap list for Kafka, `host[:port]` for MQTT.
    #[validate(length(min = 1, message = "Broker address cannot be empty"))]
    pub address: String,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Topic must be between 1 and 255 characters"
    ))]
    pub topic: String,

    #[validate(nested)]
    pub kafka: KafkaConfig,

    #[validate(nested)]
    pub mqtt: MqttConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            kind: TransportKind::default(),
            address: "localhost".to_string(),
            topic: "sensors".to_string(),
            kafka: KafkaConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

/// `[transport.kafka]` section.
///
/// `properties` are handed to librdkafka untouched, e.g.
///
/// ```toml
/// [transport.kafka.properties]
/// "security.protocol" = "SASL_SSL"
/// "message.timeout.ms" = "30000"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct KafkaConfig {
    pub properties: BTreeMap<String, String>,
}

/// `[transport.mqtt]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_credentials"))]
pub struct MqttConfig {
    #[validate(length(
        min = 1,
        max = 36,
        message = "Client ID must be between 1 and 36 characters"
    ))]
    pub client_id: String,

    #[validate(range(max = 2, message = "QoS must be 0, 1 or 2"))]
    pub qos: u8,

    pub retain: bool,

    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive_secs: u64,

    pub clean_session: bool,

    /// Capacity of the client request channel. A full channel is reported
    /// to the publisher as Queue Full.
    #[validate(range(
        min = 1,
        max = 10000,
        message = "Queue capacity must be between 1 and 10000"
    ))]
    pub queue_capacity: usize,

    pub username: Option<String>,
    pub password: Option<String>,

    #[validate(range(
        min = 100,
        max = 60000,
        message = "Initial reconnect delay must be between 100 and 60000 ms"
    ))]
    pub reconnect_initial_ms: u64,

    #[validate(range(
        min = 100,
        max = 3600000,
        message = "Maximum reconnect delay must be between 100 and 3600000 ms"
    ))]
    pub reconnect_max_ms: u64,

    /// Reconnect attempts before giving up. Unset retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

fn validate_credentials(config: &MqttConfig) -> Result<(), ValidationError> {
    if config.password.is_some() && config.username.is_none() {
        let mut err = ValidationError::new("password_without_username");
        err.message = Some("MQTT password is set but username is missing".into());
        return Err(err);
    }
    Ok(())
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            Duration::from_millis(self.reconnect_initial_ms),
            Duration::from_millis(self.reconnect_max_ms),
            2.0,
            self.max_reconnect_attempts,
        )
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            client_id: "sensor-relay".to_string(),
            qos: 1,
            retain: false,
            keep_alive_secs: 30,
            clean_session: true,
            queue_capacity: 10,
            username: None,
            password: None,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 60000,
            max_reconnect_attempts: None,
        }
    }
}
