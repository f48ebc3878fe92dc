//! Sensor readers.
//!
//! The relay only needs calibrated physical values; how the device produces
//! them is up to the reader. Two readers exist:
//!
//! * [`iio::IioReader`] reads a BME280 bound to the Linux IIO driver through
//!   sysfs, where the kernel already applies the compensation formulas.
//! * [`simulated::SimulatedReader`] produces slowly drifting plausible values
//!   for runs without hardware.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::{
    config::sensor::{SensorConfig, SensorKind},
    core::sample::Sample,
};

pub mod iio;
pub mod simulated;

#[derive(Error, Debug)]
pub enum SensorError {
    /// No device matching the configuration exists. Fatal at startup.
    #[error("Sensor device '{name}' not found under {root}")]
    DeviceNotFound { name: String, root: String },

    #[error("Failed to read file {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {channel} from {location}: {reason}")]
    ParseError {
        channel: String,
        location: String,
        reason: String,
    },

    /// The device answered, but with a value that cannot be physical.
    #[error("Implausible {channel} reading: {value}")]
    InvalidReading { channel: &'static str, value: f64 },
}

pub type SensorResult<T> = Result<T, SensorError>;

/// Source of [`Sample`]s.
#[async_trait::async_trait]
pub trait SensorReader: Send + Sync {
    fn name(&self) -> &str;

    /// Takes one reading. Failures are per-call; the next call may succeed.
    async fn read_sample(&self) -> SensorResult<Sample>;
}

/// Opens the configured sensor.
pub async fn setup(config: &SensorConfig) -> SensorResult<Arc<dyn SensorReader>> {
    let reader: Arc<dyn SensorReader> = match config.kind {
        SensorKind::Iio => Arc::new(
            iio::IioReader::discover(&config.sysfs_root, &config.device_name, config.sea_level_hpa)
                .await?,
        ),
        SensorKind::Simulated => Arc::new(simulated::SimulatedReader::new(config.sea_level_hpa)),
    };
    info!("Sensor ready: {} ({})", reader.name(), config.kind);
    Ok(reader)
}

/// Altitude in meters for a station pressure, using the international
/// barometric formula.
///
/// ```text
/// altitude = 44330 * (1 - (p / p0) ^ (1 / 5.255))
/// ```
pub fn altitude(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    44330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(1.0 / 5.255))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_altitude_at_sea_level_is_zero() {
        assert!(altitude(1013.25, 1013.25).abs() < 1e-9);
    }

    #[test]
    fn test_altitude_known_points() {
        // Roughly 111 m for a 13.25 hPa drop near sea level.
        let a = altitude(1000.0, 1013.25);
        assert!((a - 110.9).abs() < 0.5, "got {}", a);

        // Standard atmosphere: ~5574 m at 500 hPa.
        let a = altitude(500.0, 1013.25);
        assert!((a - 5574.0).abs() < 10.0, "got {}", a);

        // Higher pressure than the reference gives a negative altitude.
        assert!(altitude(1030.0, 1013.25) < 0.0);
    }

    #[tokio::test]
    async fn test_setup_simulated() {
        let config = SensorConfig {
            kind: SensorKind::Simulated,
            ..Default::default()
        };
        let reader = setup(&config).await.unwrap();
        assert_eq!(reader.name(), "simulated");
        assert!(reader.read_sample().await.unwrap().is_finite());
    }

    #[tokio::test]
    async fn test_setup_missing_iio_device() {
        let root = tempfile::tempdir().unwrap();
        let config = SensorConfig {
            kind: SensorKind::Iio,
            sysfs_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let err = setup(&config).await.err().unwrap();
        assert!(matches!(err, SensorError::DeviceNotFound { .. }));
    }
}
