// SIMPLE-THERMAL TEMPERATURE SAMPLER
// REDUCES ONE OR MORE SENSORS TO A SINGLE SIGNED SAMPLE PER TICK.
//
// SINGLE MODE:    ONE NAMED SENSOR. NOT FOUND IS FATAL FOR THE LOOP.
// AGGREGATE MODE: ONE SENSOR PER CPU, TRUNCATING MEAN. ANY MISSING SENSOR
//                 FAILS THE WHOLE TICK. NO PARTIAL SUMS: A PARTIAL SUM WOULD
//                 BIAS TOWARD WHICHEVER CPUS HAPPENED TO BE READ FIRST.

use crate::error::{SampleError, SensorError};
use crate::platform::SensorSource;

pub const DEFAULT_SENSOR_PATTERN: &str = "cpu-1-{cpu}-usr";
pub const CPU_PLACEHOLDER: &str = "{cpu}";

// LABEL USED IN ZONE-CHANGE LOGS FOR AGGREGATE MODE
pub const AGGREGATE_LABEL: &str = "average";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SensorMode {
    Single(String),
    Aggregate { pattern: String, cpu_count: usize },
}

pub struct TemperatureSampler {
    mode: SensorMode,
    // AGGREGATE NAMES RESOLVED ONCE, NOT FORMATTED EVERY TICK
    names: Vec<String>,
}

impl TemperatureSampler {
    pub fn new(mode: SensorMode) -> Self {
        let names = match &mode {
            SensorMode::Single(name) => vec![name.clone()],
            SensorMode::Aggregate { pattern, cpu_count } => {
                (0..*cpu_count).map(|cpu| sensor_name(pattern, cpu)).collect()
            }
        };
        Self { mode, names }
    }

    pub fn mode(&self) -> &SensorMode {
        &self.mode
    }

    pub fn label(&self) -> &str {
        match &self.mode {
            SensorMode::Single(name) => name,
            SensorMode::Aggregate { .. } => AGGREGATE_LABEL,
        }
    }

    // EVERY SENSOR NAME THIS SAMPLER WILL QUERY
    pub fn sensor_names(&self) -> &[String] {
        &self.names
    }

    pub fn sample(&self, source: &dyn SensorSource) -> Result<i32, SampleError> {
        match &self.mode {
            SensorMode::Single(name) => match source.read_temp(name) {
                Ok(t) => Ok(t),
                Err(SensorError::NotFound(n)) => Err(SampleError::SensorMissing(n)),
                Err(e) => Err(SampleError::Read(e)),
            },
            SensorMode::Aggregate { .. } => self.sample_aggregate(source),
        }
    }

    fn sample_aggregate(&self, source: &dyn SensorSource) -> Result<i32, SampleError> {
        let mut sum: i64 = 0;
        let mut missing = Vec::new();

        // KEEP SCANNING AFTER A MISS SO EVERY MISSING SENSOR IS REPORTED
        for name in &self.names {
            match source.read_temp(name) {
                Ok(t) => sum += t as i64,
                Err(SensorError::NotFound(n)) => missing.push(n),
                Err(e) => return Err(SampleError::Read(e)),
            }
        }

        if !missing.is_empty() {
            return Err(SampleError::AggregateMissing(missing));
        }
        if self.names.is_empty() {
            return Err(SampleError::AggregateMissing(Vec::new()));
        }

        Ok((sum / self.names.len() as i64) as i32)
    }
}

pub fn sensor_name(pattern: &str, cpu: usize) -> String {
    pattern.replace(CPU_PLACEHOLDER, &cpu.to_string())
}
