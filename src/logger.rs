//! Logging initialization.
//!
//! [`LoggerManager`] validates the `[logger]` section and installs the global
//! `tracing` subscriber: a console layer that always writes to **stderr**
//! (stdout is reserved for the `stdout` transport) and an optional systemd
//! journald layer. `RUST_LOG` overrides the configured level for both.

use std::{
    fmt::{self, Write as _},
    io,
};

use thiserror::Error;
use time::{
    format_description::{well_known::Rfc3339, OwnedFormatItem},
    OffsetDateTime,
};
use tracing::instrument;
use tracing_subscriber::{
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
    EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    #[error("Invalid timestamp format: {0}")]
    TimestampFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to install the global subscriber: {0}")]
    InitializationError(String),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald was requested, failed, and console output is off: nothing
    /// would be logged at all.
    #[error("Failed to initialize journald logger and console output is disabled")]
    JournaldFailedWithoutConsole,
}

/// Console timestamp rendering for the configured [`TimestampFormat`].
#[derive(Debug, Clone)]
enum Timer {
    Rfc3339,
    Unix,
    Custom(OwnedFormatItem),
}

impl Timer {
    fn from_config(format: &TimestampFormat) -> Result<Self, LoggerError> {
        Ok(match format {
            TimestampFormat::Rfc3339 => Timer::Rfc3339,
            TimestampFormat::Unix => Timer::Unix,
            TimestampFormat::Custom(description) => Timer::Custom(
                time::format_description::parse_owned::<2>(description)
                    .map_err(|e| LoggerError::TimestampFormat(e.to_string()))?,
            ),
        })
    }
}

impl FormatTime for Timer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_utc();
        match self {
            Timer::Rfc3339 => w.write_str(&now.format(&Rfc3339).map_err(|_| fmt::Error)?),
            Timer::Unix => write!(w, "{}", now.unix_timestamp()),
            Timer::Custom(items) => w.write_str(&now.format(items).map_err(|_| fmt::Error)?),
        }
    }
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Builds the configured layers and installs them as the global
    /// subscriber. Call once, before the first `tracing` event that matters.
    #[instrument(skip(self))]
    pub fn init(&self) -> Result<(), LoggerError> {
        let layers = self.build_layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn build_layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if self.config.console.enabled {
            layers.push(self.console_layer(&self.config.console)?);
        }

        if self.config.journald.enabled {
            match self.journald_layer() {
                Ok(layer) => {
                    layers.push(layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        self.config.journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if !self.config.console.enabled {
                        return Err(LoggerError::JournaldFailedWithoutConsole);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        Ok(layers)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    fn console_layer(&self, config: &ConsoleConfig) -> Result<BoxedLayer, LoggerError> {
        let timer = Timer::from_config(&self.config.timestamp_format)?;
        let base = tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_writer(io::stderr);

        let layer = match config.format {
            LogFormat::Json => base
                .json()
                .with_ansi(false)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Pretty => base
                .pretty()
                .with_ansi(config.ansi_colors)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Compact => base
                .compact()
                .with_ansi(config.ansi_colors)
                .with_filter(self.filter())
                .boxed(),
        };
        Ok(layer)
    }

    fn journald_layer(&self) -> Result<BoxedLayer, LoggerError> {
        let layer = tracing_journald::layer()?
            .with_syslog_identifier(self.config.journald.identifier.clone());
        Ok(layer.with_filter(self.filter()).boxed())
    }
}
