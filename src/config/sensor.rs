//! Sensor selection and calibration constants.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::encoder::DEFAULT_SENSOR_TAG;

/// Source of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// BME280 exposed by the Linux IIO driver under sysfs.
    #[default]
    Iio,
    /// Synthetic drifting readings, for interactive runs without hardware.
    Simulated,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Iio => f.write_str("iio"),
            SensorKind::Simulated => f.write_str("simulated"),
        }
    }
}

/// `[sensor]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,

    /// Value of the `"sensor"` key in every message.
    #[validate(length(min = 1, max = 64, message = "Sensor tag must be between 1 and 64 characters"))]
    pub tag: String,

    /// IIO device `name` attribute to look for.
    #[validate(length(min = 1, message = "Device name cannot be empty"))]
    pub device_name: String,

    /// Directory holding the `iio:deviceN` entries.
    pub sysfs_root: PathBuf,

    /// Reference pressure at sea level (hPa) for the altitude estimate.
    #[validate(range(
        min = 800.0,
        max = 1200.0,
        message = "Sea level pressure must be between 800 and 1200 hPa"
    ))]
    pub sea_level_hpa: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            kind: SensorKind::default(),
            tag: DEFAULT_SENSOR_TAG.to_string(),
            device_name: "bme280".to_string(),
            sysfs_root: PathBuf::from("/sys/bus/iio/devices"),
            sea_level_hpa: 1013.25,
        }
    }
}
