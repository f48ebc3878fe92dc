use std::sync::Mutex;

use super::{altitude, SensorReader, SensorResult};
use crate::core::sample::Sample;

/// Baseline readings the simulation drifts around.
const BASE_TEMPERATURE: f64 = 21.0;
const BASE_PRESSURE: f64 = 1012.0;
const BASE_HUMIDITY: f64 = 45.0;

/// Deterministic, slowly drifting readings for runs without hardware.
///
/// Each call advances a phase; the readings follow slow sine waves of
/// different periods around the baselines above, so consecutive samples
/// differ slightly and always stay plausible.
#[derive(Debug)]
pub struct SimulatedReader {
    step: Mutex<u64>,
    sea_level_hpa: f64,
}

impl SimulatedReader {
    pub fn new(sea_level_hpa: f64) -> Self {
        Self {
            step: Mutex::new(0),
            sea_level_hpa,
        }
    }

    fn next_step(&self) -> u64 {
        let mut step = self.step.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = *step;
        *step = step.wrapping_add(1);
        current
    }
}

#[async_trait::async_trait]
impl SensorReader for SimulatedReader {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn read_sample(&self) -> SensorResult<Sample> {
        let t = self.next_step() as f64;
        let temperature = BASE_TEMPERATURE + 3.0 * (t / 24.0).sin();
        let pressure = BASE_PRESSURE + 6.0 * (t / 57.0).sin();
        let humidity = BASE_HUMIDITY + 10.0 * (t / 31.0).cos();

        Ok(Sample::new(
            temperature,
            pressure,
            humidity,
            altitude(pressure, self.sea_level_hpa),
        ))
    }
}
