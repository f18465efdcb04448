// SIMPLE-THERMAL CONFIGURATION
// JSON PLATFORM DESCRIPTION. LOADED ONCE AT STARTUP, NEVER RELOADED.
//
// REQUIRED: poll_ms, zones. EVERYTHING ELSE HAS A DEFAULT.
// A BAD FILE IS FATAL: THE DAEMON DOES NOT START ON A GUESS.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::control::LoopTiming;
use crate::error::ConfigError;
use crate::platform::{parse_cpu_list, ClusterMap};
use crate::sensor::{SensorMode, CPU_PLACEHOLDER, DEFAULT_SENSOR_PATTERN};
use crate::window::{DEFAULT_WINDOW, MAX_WINDOW};
use crate::zone::{ClusterCeilings, ZoneDefinition, ZoneTable};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/simple-thermal.json";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ZoneRecord {
    pub index: usize,
    pub little_khz: u32,
    pub big_khz: u32,
    pub prime_khz: u32,
    pub trip_temp: i32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClusterLists {
    #[serde(default)]
    pub little: String,
    #[serde(default)]
    pub big: String,
    #[serde(default)]
    pub prime: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub poll_ms: u64,
    #[serde(default)]
    pub start_delay_s: u64,
    // ABSENT: AGGREGATE PER-CPU MODE
    #[serde(default)]
    pub thermal_zone: Option<String>,
    #[serde(default = "default_pattern")]
    pub sensor_pattern: String,
    #[serde(default)]
    pub cpu_count: Option<usize>,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub clusters: Option<ClusterLists>,
    pub zones: Vec<ZoneRecord>,
}

fn default_pattern() -> String {
    DEFAULT_SENSOR_PATTERN.to_string()
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_enabled() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_ms == 0 {
            return Err(ConfigError::PollInterval);
        }
        if self.window == 0 || self.window > MAX_WINDOW {
            return Err(ConfigError::WindowSize);
        }
        if self.thermal_zone.is_none() && !self.sensor_pattern.contains(CPU_PLACEHOLDER) {
            return Err(ConfigError::SensorPattern(self.sensor_pattern.clone()));
        }
        if self.cpu_count == Some(0) {
            return Err(ConfigError::CpuCount);
        }
        if let Some(lists) = &self.clusters {
            parse_cpu_list(&lists.little)?;
            parse_cpu_list(&lists.big)?;
            parse_cpu_list(&lists.prime)?;
        }
        // BUILDING THE TABLE CHECKS INDICES, CEILINGS AND TRIP ORDER
        self.zone_table()?;
        Ok(())
    }

    // RECORDS MAY APPEAR IN ANY ORDER. INDICES MUST COVER 0..N EXACTLY ONCE.
    pub fn zone_table(&self) -> Result<ZoneTable, ConfigError> {
        let count = self.zones.len();
        if count == 0 {
            return Err(ConfigError::NoZones);
        }

        let mut slots: Vec<Option<ZoneDefinition>> = vec![None; count];
        for rec in &self.zones {
            let slot = slots
                .get_mut(rec.index)
                .ok_or(ConfigError::ZoneIndex { index: rec.index, count })?;
            if slot.is_some() {
                return Err(ConfigError::DuplicateZone(rec.index));
            }
            *slot = Some(ZoneDefinition {
                ceilings: ClusterCeilings {
                    little_khz: rec.little_khz,
                    big_khz: rec.big_khz,
                    prime_khz: rec.prime_khz,
                },
                trip_temp: rec.trip_temp,
            });
        }

        // N RECORDS, N SLOTS, NO DUPLICATES, NO OUT-OF-RANGE: EVERY SLOT IS FILLED
        ZoneTable::new(slots.into_iter().flatten().collect())
    }

    pub fn timing(&self) -> LoopTiming {
        LoopTiming {
            poll: Duration::from_millis(self.poll_ms),
            start_delay: Duration::from_secs(self.start_delay_s),
        }
    }

    pub fn window_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.window).unwrap_or(NonZeroUsize::MIN)
    }

    // possible_cpus IS THE PLATFORM'S COUNT, USED WHEN cpu_count IS ABSENT
    pub fn sensor_mode(&self, possible_cpus: usize) -> SensorMode {
        match &self.thermal_zone {
            Some(name) => SensorMode::Single(name.clone()),
            None => SensorMode::Aggregate {
                pattern: self.sensor_pattern.clone(),
                cpu_count: self.cpu_count.unwrap_or(possible_cpus).max(1),
            },
        }
    }

    // EXPLICIT CLUSTER LISTS, IF CONFIGURED. None: DETECT FROM THE PLATFORM.
    pub fn cluster_map(&self, possible_cpus: usize) -> Result<Option<ClusterMap>, ConfigError> {
        let Some(lists) = &self.clusters else {
            return Ok(None);
        };
        let little = parse_cpu_list(&lists.little)?;
        let big = parse_cpu_list(&lists.big)?;
        let prime = parse_cpu_list(&lists.prime)?;

        let listed = little.iter().chain(&big).chain(&prime).max().map_or(0, |&m| m + 1);
        Ok(Some(ClusterMap::from_lists(possible_cpus.max(listed), &little, &big)))
    }
}
