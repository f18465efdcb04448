// SIMPLE-THERMAL ERROR TAXONOMY
// FATAL AT STARTUP: CONFIG, RESOURCE, REGISTRATION.
// SENSOR ERRORS ARE FATAL ONLY IN SINGLE-SENSOR MODE.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("poll interval must be greater than zero")]
    PollInterval,

    #[error("window size must be between 1 and {}", crate::window::MAX_WINDOW)]
    WindowSize,

    #[error("no zones specified")]
    NoZones,

    #[error("zone {0} specified more than once")]
    DuplicateZone(usize),

    #[error("zone {index} out of range (have {count} zones, indices must be 0..{count})")]
    ZoneIndex { index: usize, count: usize },

    #[error("zone {index}: {cluster} ceiling is zero")]
    ZeroCeiling { index: usize, cluster: &'static str },

    #[error("zone {index}: trip {trip} is below zone {prev_index} trip {prev_trip}")]
    TripOrder {
        index: usize,
        trip: i32,
        prev_index: usize,
        prev_trip: i32,
    },

    #[error("sensor pattern {0:?} has no {{cpu}} placeholder")]
    SensorPattern(String),

    #[error("cpu count must be greater than zero")]
    CpuCount,

    #[error("bad cpu list {list:?}: {reason}")]
    CpuList { list: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("thermal zone {0} not found")]
    NotFound(String),

    #[error("failed to read thermal zone {name}: {reason}")]
    Read { name: String, reason: String },
}

// ONE TICK'S WORTH OF SAMPLING FAILURE
#[derive(Debug, Error)]
pub enum SampleError {
    // SINGLE-SENSOR MODE: THE CONFIGURED SENSOR IS GONE. HALTS THE LOOP.
    #[error("thermal zone {0} not found")]
    SensorMissing(String),

    // AGGREGATE MODE: ONE OR MORE PER-CPU SENSORS MISSING. TICK SKIPPED.
    #[error("{} per-cpu sensor(s) missing: {}", .0.len(), .0.join(", "))]
    AggregateMissing(Vec<String>),

    #[error(transparent)]
    Read(SensorError),
}

impl SampleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SensorMissing(_))
    }
}

#[derive(Debug, Error)]
pub enum ThermalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("thermal zone {0} not found")]
    SensorMissing(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("failed to register policy adjuster: {0}")]
    NotifierRegistrationFailed(String),

    #[error("policy update failed for cpu {cpu}: {reason}")]
    PolicyUpdate { cpu: usize, reason: String },
}

pub type Result<T, E = ThermalError> = std::result::Result<T, E>;
