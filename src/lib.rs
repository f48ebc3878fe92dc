//! sensor-relay — environmental sensor sampler and broker publisher
//!
//! The relay samples a temperature/pressure/humidity sensor on a fixed
//! cadence, encodes each reading as a single-line JSON message and hands it
//! to a message broker client. A saturated client queue is waited out
//! rather than treated as an error; delivery reports are served between
//! ticks, and on shutdown in-flight messages are drained with a bounded
//! timeout before the process exits.
//!
//! ## Modules
//!
//! * `config` — Configuration structures, loading, validation, and defaults.
//!   TOML files validated via the `validator` crate, overridden from the CLI.
//!
//! * `core` — The produce pipeline:
//!   - Sampling controller and run summary
//!   - Payload encoder and decoder
//!   - Publisher with Queue-Full retry
//!   - Delivery tracking
//!   - Run/drain/stop lifecycle
//!
//! * `broker` — The [`broker::BrokerClient`] contract and its transports.
//!
//! * `sensor` — Sensor readers (Linux IIO sysfs, simulated).
//!
//! * `logger` — Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! ## Features
//!
//! * `mqtt` — MQTT transport built on `rumqttc` (default: enabled).
//! * `kafka` — Kafka transport built on `rdkafka` (requires librdkafka).
//!
//! The `stdout` transport is always compiled in.

pub mod broker;
pub mod cli;
pub mod config;
pub mod core;
pub mod logger;
pub mod sensor;
