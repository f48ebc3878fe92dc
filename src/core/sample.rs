use std::time::SystemTime;

/// One set of calibrated physical readings taken at a point in time.
///
/// Produced fresh on every sampling tick and discarded once encoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Hectopascals.
    pub pressure: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Meters above sea level, derived from pressure.
    pub altitude: f64,
    /// Wall-clock time the sensor was read.
    pub sampled_at: SystemTime,
}

impl Sample {
    pub fn new(temperature: f64, pressure: f64, humidity: f64, altitude: f64) -> Self {
        Self {
            temperature,
            pressure,
            humidity,
            altitude,
            sampled_at: SystemTime::now(),
        }
    }

    /// True when every reading is a finite number.
    pub fn is_finite(&self) -> bool {
        self.temperature.is_finite()
            && self.pressure.is_finite()
            && self.humidity.is_finite()
            && self.altitude.is_finite()
    }
}
