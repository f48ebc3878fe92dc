//! Configuration loading, validation and command-line overrides.
//!
//! Lookup order for the TOML file:
//!
//! 1. an explicit path (`--config`, which clap also fills from `SENSOR_RELAY_CONFIG`),
//! 2. the `SENSOR_RELAY_CONFIG` environment variable (library callers),
//! 3. `/etc/sensor-relay/config.toml` if it exists,
//! 4. built-in defaults.
//!
//! The broker address, topic and sampling interval given on the command line
//! override whatever the file says. The merged result is validated once more
//! and stays immutable afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{
    logger::LoggerConfig,
    sampling::{PublisherConfig, SamplingConfig},
    sensor::SensorConfig,
    transport::TransportConfig,
};

pub mod logger;
pub mod sampling;
pub mod sensor;
pub mod transport;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SENSOR_RELAY_CONFIG";

/// Used when neither a flag nor the environment names a file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sensor-relay/config.toml";

/// Timestamp for the `print_*!` macros, which run before the tracing
/// subscriber exists.
#[doc(hidden)]
pub fn early_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_default()
}

/// Timestamped line on stderr, for use before logging is initialized.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Values taken from the command line. `None` keeps the file's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub address: Option<String>,
    pub topic: Option<String>,
    pub interval_secs: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub sampling: SamplingConfig,

    #[validate(nested)]
    pub publisher: PublisherConfig,

    #[validate(nested)]
    pub sensor: SensorConfig,

    #[validate(nested)]
    pub transport: TransportConfig,
}

impl Config {
    /// Locates, loads and validates the configuration, then applies
    /// `overrides`.
    pub fn new(explicit: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let config = match Self::find_config_path(explicit)? {
            Some(path) => Self::load(&path)?,
            None => {
                print_info!("No configuration file found, using built-in defaults");
                Config::default()
            }
        };
        config.with_overrides(overrides)
    }

    /// Resolves which file to read. `Ok(None)` means "use defaults".
    ///
    /// A path named explicitly (flag or environment) must exist; the system
    /// default path is optional.
    fn find_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        let named = explicit.map(Path::to_path_buf).or_else(|| {
            std::env::var_os(CONFIG_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        });

        if let Some(path) = named {
            if !path.exists() {
                return Err(ConfigError::NotFound(path));
            }
            print_info!("Using config from: {}", path.display());
            return Ok(Some(path));
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(Some(fallback.to_path_buf()));
        }
        Ok(None)
    }

    /// Reads and validates one TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let config_str = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Applies command-line values and validates the result.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(address) = &overrides.address {
            self.transport.address = address.clone();
        }
        if let Some(topic) = &overrides.topic {
            self.transport.topic = topic.clone();
        }
        if let Some(interval) = overrides.interval_secs {
            self.sampling.interval_secs = interval;
        }

        self.validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(self)
    }
}
