// SIMPLE-THERMAL ZONE TABLE
// PURE-RUST MODULE: ZERO SYSFS DEPENDENCIES
// SHARED BETWEEN THE CONTROL LOOP, THE FREQUENCY CLAMP AND THE OFFLINE TESTS
//
// A ZONE IS A TIER OF PER-CLUSTER FREQUENCY CEILINGS, ACTIVE ONCE THE
// SMOOTHED TEMPERATURE REACHES ITS TRIP POINT. INDEX ORDER IS SEVERITY ORDER.

use crate::error::ConfigError;

// CLUSTER

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Cluster {
    Little = 0,
    Big = 1,
    Prime = 2,
}

impl Cluster {
    pub const ALL: [Cluster; 3] = [Cluster::Little, Cluster::Big, Cluster::Prime];

    pub fn label(self) -> &'static str {
        match self {
            Self::Little => "little",
            Self::Big => "big",
            Self::Prime => "prime",
        }
    }
}

// CEILINGS

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ClusterCeilings {
    pub little_khz: u32,
    pub big_khz: u32,
    pub prime_khz: u32,
}

impl ClusterCeilings {
    pub fn for_cluster(&self, cluster: Cluster) -> u32 {
        match cluster {
            Cluster::Little => self.little_khz,
            Cluster::Big => self.big_khz,
            Cluster::Prime => self.prime_khz,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ZoneDefinition {
    pub ceilings: ClusterCeilings,
    // SAME UNIT AS THE SENSOR SOURCE (SYSFS: MILLIDEGREES CELSIUS)
    pub trip_temp: i32,
}

// HANDLE INTO THE IMMUTABLE TABLE. NEVER OUTLIVES ITS MEANING:
// THE TABLE IS NEVER MUTATED AFTER LOAD.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct ZoneIndex(u32);

impl ZoneIndex {
    pub fn get(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_raw(v: u32) -> Self {
        Self(v)
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ZoneIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ZONE TABLE

#[derive(Debug)]
pub struct ZoneTable {
    zones: Box<[ZoneDefinition]>,
}

impl ZoneTable {
    // VALIDATES THE SEVERITY INVARIANT: TRIPS NON-DECREASING WITH INDEX.
    // AN OUT-OF-ORDER TABLE WOULD SILENTLY BREAK THE DESCENDING SCAN.
    pub fn new(zones: Vec<ZoneDefinition>) -> Result<Self, ConfigError> {
        if zones.is_empty() {
            return Err(ConfigError::NoZones);
        }
        // ZoneIndex IS u32 AND u32::MAX IS THE "NONE" SENTINEL IN SharedState
        if zones.len() >= u32::MAX as usize {
            return Err(ConfigError::ZoneIndex { index: zones.len(), count: zones.len() });
        }

        for (i, z) in zones.iter().enumerate() {
            for cluster in Cluster::ALL {
                if z.ceilings.for_cluster(cluster) == 0 {
                    return Err(ConfigError::ZeroCeiling { index: i, cluster: cluster.label() });
                }
            }
        }

        for (i, pair) in zones.windows(2).enumerate() {
            if pair[1].trip_temp < pair[0].trip_temp {
                return Err(ConfigError::TripOrder {
                    index: i + 1,
                    trip: pair[1].trip_temp,
                    prev_index: i,
                    prev_trip: pair[0].trip_temp,
                });
            }
        }

        Ok(Self { zones: zones.into_boxed_slice() })
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn get(&self, index: ZoneIndex) -> Option<&ZoneDefinition> {
        self.zones.get(index.get())
    }

    pub fn index(&self, i: usize) -> Option<ZoneIndex> {
        if i < self.zones.len() {
            Some(ZoneIndex(i as u32))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ZoneIndex, &ZoneDefinition)> {
        self.zones.iter().enumerate().map(|(i, z)| (ZoneIndex(i as u32), z))
    }
}

// ZONE SELECTION (DESCENDING THRESHOLD SCAN)
// NO HYSTERESIS: THE SMOOTHING WINDOW IS THE ONLY DAMPING.
// EQUAL TRIPS: HIGHEST INDEX WINS BECAUSE THE SCAN STARTS AT THE TOP.

pub fn select_zone(avg_temp: i32, table: &ZoneTable) -> Option<ZoneIndex> {
    table
        .zones
        .iter()
        .rposition(|z| z.trip_temp <= avg_temp)
        .map(|i| ZoneIndex(i as u32))
}

pub fn zone_label(zone: Option<ZoneIndex>) -> String {
    match zone {
        Some(z) => z.to_string(),
        None => "none".to_string(),
    }
}
