//! Payload encoding for sensor samples.
//!
//! Every sample becomes one single-line JSON object with a fixed key order:
//!
//! ```text
//! {"sensor":"bme280", "humidity":41.23, "pressure":1013.25, "temperature":22.10, "altitude":120.50, "timestamp":1700000000}
//! ```
//!
//! Numeric readings carry exactly two decimals; `timestamp` is integer seconds
//! since the Unix epoch, captured when the message is encoded rather than when
//! the sensor was read. No trailing newline is included.

use std::fmt::{self, Write as _};

use bytes::Bytes;
use serde::Deserialize;

use super::sample::Sample;

/// Tag used for the `sensor` key unless configured otherwise.
pub const DEFAULT_SENSOR_TAG: &str = "bme280";

/// Longest body produced for finite readings is well under this.
const BODY_CAPACITY: usize = 256;

/// An encoded, broker-ready sample.
///
/// Immutable once built. Cloning is cheap (reference counted), and every
/// sampling cycle builds a new one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    body: Bytes,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Body as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.body))
    }
}

/// Builds [`Message`]s from [`Sample`]s.
#[derive(Debug, Clone)]
pub struct Encoder {
    /// Tag already rendered as a JSON string literal (quoted and escaped).
    tag_literal: String,
}

impl Encoder {
    pub fn new(tag: &str) -> Self {
        let tag_literal = serde_json::to_string(tag).unwrap_or_else(|_| "\"\"".to_string());
        Self { tag_literal }
    }

    /// Encodes a sample, stamping it with the current time.
    pub fn encode(&self, sample: &Sample) -> Message {
        self.encode_at(sample, time::OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Encodes a sample with an explicit timestamp (seconds since epoch).
    ///
    /// Non-finite readings are written as `null` so the body stays valid JSON.
    pub fn encode_at(&self, sample: &Sample, timestamp: i64) -> Message {
        let mut body = String::with_capacity(BODY_CAPACITY);
        body.push_str("{\"sensor\":");
        body.push_str(&self.tag_literal);
        push_field(&mut body, "humidity", sample.humidity);
        push_field(&mut body, "pressure", sample.pressure);
        push_field(&mut body, "temperature", sample.temperature);
        push_field(&mut body, "altitude", sample.altitude);
        // Writing into a String cannot fail.
        let _ = write!(body, ", \"timestamp\":{}}}", timestamp);
        Message::new(body)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_SENSOR_TAG)
    }
}

fn push_field(body: &mut String, key: &str, value: f64) {
    if value.is_finite() {
        let _ = write!(body, ", \"{}\":{:.2}", key, value);
    } else {
        let _ = write!(body, ", \"{}\":null", key);
    }
}

/// Decoded view of a message body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Payload {
    pub sensor: String,
    pub humidity: f64,
    pub pressure: f64,
    pub temperature: f64,
    pub altitude: f64,
    pub timestamp: i64,
}

impl Payload {
    pub fn decode(message: &Message) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(message.as_bytes())
    }

    /// Readings as a sample. `sampled_at` is taken from the encoded timestamp.
    pub fn to_sample(&self) -> Sample {
        let sampled_at = std::time::UNIX_EPOCH
            + std::time::Duration::from_secs(self.timestamp.max(0) as u64);
        Sample {
            temperature: self.temperature,
            pressure: self.pressure,
            humidity: self.humidity,
            altitude: self.altitude,
            sampled_at,
        }
    }
}
