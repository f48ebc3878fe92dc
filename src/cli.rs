use std::{path::PathBuf, process};

use clap::{error::ErrorKind, Parser};

use crate::config::{Overrides, CONFIG_ENV};

/// Samples an environmental sensor and publishes JSON readings to a broker.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "sensor-relay", version, about)]
pub struct Cli {
    /// Broker address (Kafka bootstrap servers, or MQTT host[:port])
    pub broker: String,

    /// Topic every reading is published to
    pub topic: String,

    /// Path to the TOML configuration file
    #[arg(long, short = 'c', env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Seconds between two samples (overrides `sampling.interval_secs`)
    #[arg(long, short = 'i')]
    pub interval: Option<u64>,
}

impl Cli {
    /// Parses the process arguments.
    ///
    /// Help and version requests print and exit 0; any usage error prints
    /// the message with usage to stderr and exits 1.
    pub fn parse_or_exit() -> Self {
        Self::try_parse().unwrap_or_else(|e| match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                process::exit(1);
            }
        })
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            address: Some(self.broker.clone()),
            topic: Some(self.topic.clone()),
            interval_secs: self.interval,
        }
    }
}
