use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::{altitude, SensorError, SensorReader, SensorResult};
use crate::core::sample::Sample;

/// Temperature channel, millidegrees Celsius.
const TEMPERATURE: &str = "in_temp_input";
/// Pressure channel, kilopascals.
const PRESSURE: &str = "in_pressure_input";
/// Humidity channel, milli-percent relative humidity.
const HUMIDITY: &str = "in_humidityrelative_input";

/// BME280 operating ranges. Readings outside them are not trusted.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = -40.0..=85.0;
const PRESSURE_RANGE: std::ops::RangeInclusive<f64> = 300.0..=1100.0;
const HUMIDITY_RANGE: std::ops::RangeInclusive<f64> = 0.0..=100.0;

/// Reads a BME280 through the kernel IIO driver.
///
/// Device layout under the sysfs root:
///
/// ```text
/// /sys/bus/iio/devices/
///   iio:device0/
///     name                        <- "bme280"
///     in_temp_input               <- "22100"        (m°C)
///     in_pressure_input           <- "101.325000000" (kPa)
///     in_humidityrelative_input   <- "41230"        (m%RH)
/// ```
#[derive(Debug, Clone)]
pub struct IioReader {
    device_dir: PathBuf,
    label: String,
    sea_level_hpa: f64,
}

impl IioReader {
    /// Scans `root` for the first `iio:device*` whose `name` equals `device_name`.
    pub async fn discover(root: &Path, device_name: &str, sea_level_hpa: f64) -> SensorResult<Self> {
        let not_found = || SensorError::DeviceNotFound {
            name: device_name.to_string(),
            root: root.display().to_string(),
        };

        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", root.display(), e);
                return Err(not_found());
            }
        };

        let mut candidates = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(dir_name) = entry.file_name().into_string() {
                if dir_name.starts_with("iio:device") {
                    candidates.push(dir_name);
                }
            }
        }
        candidates.sort();

        for dir_name in candidates {
            let device_dir = root.join(&dir_name);
            // Devices without a readable name attribute are skipped.
            let Ok(name) = tokio::fs::read_to_string(device_dir.join("name")).await else {
                continue;
            };
            trace!("Found IIO device {} named '{}'", dir_name, name.trim());
            if name.trim() == device_name {
                debug!("Using IIO device {}", device_dir.display());
                return Ok(Self {
                    label: format!("{} ({})", device_name, dir_name),
                    device_dir,
                    sea_level_hpa,
                });
            }
        }

        Err(not_found())
    }

    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    async fn read_channel(&self, channel: &str) -> SensorResult<f64> {
        let path = self.device_dir.join(channel);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SensorError::FileRead {
                path: path.display().to_string(),
                source,
            })?;
        raw.trim()
            .parse::<f64>()
            .map_err(|e| SensorError::ParseError {
                channel: channel.to_string(),
                location: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

fn check(channel: &'static str, value: f64, range: std::ops::RangeInclusive<f64>) -> SensorResult<f64> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(SensorError::InvalidReading { channel, value })
    }
}

#[async_trait::async_trait]
impl SensorReader for IioReader {
    fn name(&self) -> &str {
        &self.label
    }

    async fn read_sample(&self) -> SensorResult<Sample> {
        let temperature = check(
            "temperature",
            self.read_channel(TEMPERATURE).await? / 1000.0,
            TEMPERATURE_RANGE,
        )?;
        let pressure = check(
            "pressure",
            self.read_channel(PRESSURE).await? * 10.0,
            PRESSURE_RANGE,
        )?;
        let humidity = check(
            "humidity",
            self.read_channel(HUMIDITY).await? / 1000.0,
            HUMIDITY_RANGE,
        )?;

        Ok(Sample::new(
            temperature,
            pressure,
            humidity,
            altitude(pressure, self.sea_level_hpa),
        ))
    }
}
