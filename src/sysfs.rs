// SIMPLE-THERMAL SYSFS BACKEND
// LINUX IMPLEMENTATION OF THE PLATFORM COLLABORATORS
//
//   SENSORS:  /sys/class/thermal/thermal_zone*/{type,temp}   (MILLIDEGREES C)
//   TOPOLOGY: /sys/devices/system/cpu/{possible,cpuN/online}
//   CLUSTERS: /sys/devices/system/cpu/cpufreq/policy*/{related_cpus,cpuinfo_max_freq}
//   POLICY:   /sys/devices/system/cpu/cpuN/cpufreq/scaling_{min,max}_freq
//
// EVERY PATH HANGS OFF A CONFIGURABLE ROOT SO TESTS CAN BUILD A FAKE TREE.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SensorError, ThermalError};
use crate::platform::{
    parse_cpu_list, AdjusterId, Platform, PolicyAdjuster, PolicyChain, PolicyLimits, Priority,
    SensorSource,
};
use crate::zone::Cluster;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

fn read_trimmed(path: &Path) -> io::Result<String> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

fn read_u32(path: &Path) -> std::result::Result<u32, String> {
    let raw = read_trimmed(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    raw.parse::<u32>().map_err(|_| format!("{}: bad value {:?}", path.display(), raw))
}

// --- SENSORS ---

pub struct SysfsSensors {
    thermal_dir: PathBuf,
    // ZONE TYPE -> temp FILE. RESCANNED ONCE ON A MISS.
    zones: RwLock<HashMap<String, PathBuf>>,
}

impl SysfsSensors {
    pub fn new(root: &Path) -> Self {
        let sensors = Self {
            thermal_dir: root.join("class/thermal"),
            zones: RwLock::new(HashMap::new()),
        };
        sensors.rescan();
        sensors
    }

    pub fn rescan(&self) {
        let mut map = HashMap::new();
        if let Ok(entries) = fs::read_dir(&self.thermal_dir) {
            for entry in entries.flatten() {
                if !entry.file_name().to_string_lossy().starts_with("thermal_zone") {
                    continue;
                }
                let dir = entry.path();
                if let Ok(name) = read_trimmed(&dir.join("type")) {
                    // FIRST ZONE WITH A GIVEN TYPE WINS, LIKE A NAME LOOKUP
                    map.entry(name).or_insert_with(|| dir.join("temp"));
                }
            }
        }
        debug!("thermal zones: {}", map.len());
        *self.zones.write() = map;
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.zones.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Option<PathBuf> {
        if let Some(p) = self.zones.read().get(name) {
            return Some(p.clone());
        }
        self.rescan();
        self.zones.read().get(name).cloned()
    }
}

impl SensorSource for SysfsSensors {
    fn read_temp(&self, name: &str) -> std::result::Result<i32, SensorError> {
        let path = self.lookup(name).ok_or_else(|| SensorError::NotFound(name.to_string()))?;
        let raw = match read_trimmed(&path) {
            Ok(raw) => raw,
            // ZONE VANISHED SINCE THE LAST SCAN (MODULE UNLOADED)
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.rescan();
                return Err(SensorError::NotFound(name.to_string()));
            }
            Err(e) => {
                return Err(SensorError::Read { name: name.to_string(), reason: e.to_string() });
            }
        };
        raw.parse::<i32>().map_err(|_| SensorError::Read {
            name: name.to_string(),
            reason: format!("bad value {:?}", raw),
        })
    }
}

// --- PLATFORM ---

// PER-CPU MAXIMUM BOOKKEEPING. None: NO cpufreq POLICY FOR THIS CPU.
#[derive(Clone, Copy, Debug)]
struct MaxFreq {
    // THE LIMIT TO RESTORE WHEN NOT THROTTLING
    user: u32,
    // cpuinfo_max_freq, IF READABLE. A USER MAX NEVER EXCEEDS IT.
    hw: Option<u32>,
    // scaling_max_freq AS LAST WRITTEN BY US. ANY OTHER VALUE IS A USER CHANGE.
    written: u32,
}

pub struct SysfsPlatform {
    cpu_dir: PathBuf,
    possible: usize,
    clusters: Box<[Cluster]>,
    max_freq: Mutex<Box<[Option<MaxFreq>]>>,
    chain: PolicyChain,
}

impl SysfsPlatform {
    pub fn new(root: &Path) -> Self {
        let cpu_dir = root.join("devices/system/cpu");

        let possible = read_trimmed(&cpu_dir.join("possible"))
            .ok()
            .and_then(|raw| parse_cpu_list(&raw).ok())
            .and_then(|cpus| cpus.last().map(|&m| m + 1))
            .unwrap_or(1);

        let clusters = detect_clusters(&cpu_dir, possible).into_boxed_slice();

        // A THROTTLED VALUE LEFT BY A DEAD INSTANCE IS INDISTINGUISHABLE FROM A
        // USER LIMIT AT THIS POINT: START FROM THE HARDWARE MAXIMUM
        let max_freq = (0..possible)
            .map(|cpu| {
                let freq = cpu_dir.join(format!("cpu{}/cpufreq", cpu));
                let current = read_u32(&freq.join("scaling_max_freq")).ok()?;
                let hw = read_u32(&freq.join("cpuinfo_max_freq")).ok();
                Some(MaxFreq { user: hw.unwrap_or(current), hw, written: current })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            cpu_dir,
            possible,
            clusters,
            max_freq: Mutex::new(max_freq),
            chain: PolicyChain::new(),
        }
    }

    // THE MAXIMUM THE CLAMP RESTORES TO WHEN IT IS NOT THROTTLING
    pub fn user_max(&self, cpu: usize) -> Option<u32> {
        self.max_freq.lock().get(cpu).copied().flatten().map(|m| m.user)
    }

    fn freq_path(&self, cpu: usize, file: &str) -> PathBuf {
        self.cpu_dir.join(format!("cpu{}/cpufreq/{}", cpu, file))
    }

    fn write_freq(&self, cpu: usize, file: &str, khz: u32) -> Result<()> {
        let path = self.freq_path(cpu, file);
        fs::write(&path, khz.to_string()).map_err(|e| ThermalError::PolicyUpdate {
            cpu,
            reason: format!("{}: {}", path.display(), e),
        })
    }
}

// RANK cpufreq POLICIES BY cpuinfo_max_freq:
//   1 POLICY  -> LITTLE
//   2         -> LITTLE, BIG
//   3+        -> LOWEST LITTLE, HIGHEST PRIME, EVERYTHING BETWEEN BIG
// CPUS IN NO POLICY ARE PRIME.
fn detect_clusters(cpu_dir: &Path, possible: usize) -> Vec<Cluster> {
    let mut policies: Vec<(u32, Vec<usize>)> = Vec::new();
    if let Ok(entries) = fs::read_dir(cpu_dir.join("cpufreq")) {
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with("policy") {
                continue;
            }
            let dir = entry.path();
            let cpus = read_trimmed(&dir.join("related_cpus"))
                .ok()
                .and_then(|raw| parse_cpu_list(&raw.replace(' ', ",")).ok());
            let max = read_u32(&dir.join("cpuinfo_max_freq")).ok();
            if let (Some(cpus), Some(max)) = (cpus, max) {
                policies.push((max, cpus));
            }
        }
    }
    policies.sort_by_key(|(max, cpus)| (*max, cpus.first().copied()));

    let mut clusters = vec![Cluster::Prime; possible];
    let n = policies.len();
    for (rank, (_, cpus)) in policies.iter().enumerate() {
        let cluster = if rank == 0 {
            Cluster::Little
        } else if rank == n - 1 && n >= 3 {
            Cluster::Prime
        } else {
            Cluster::Big
        };
        for &cpu in cpus {
            if let Some(c) = clusters.get_mut(cpu) {
                *c = cluster;
            }
        }
    }
    clusters
}

impl Platform for SysfsPlatform {
    fn possible_cpus(&self) -> usize {
        self.possible
    }

    // NO online FILE (CPU0 ON MOST KERNELS) MEANS ALWAYS ONLINE
    fn is_online(&self, cpu: usize) -> bool {
        if cpu >= self.possible {
            return false;
        }
        match read_trimmed(&self.cpu_dir.join(format!("cpu{}/online", cpu))) {
            Ok(v) => v == "1",
            Err(_) => true,
        }
    }

    fn cluster_of(&self, cpu: usize) -> Cluster {
        self.clusters.get(cpu).copied().unwrap_or(Cluster::Prime)
    }

    fn register_adjuster(&self, adjuster: Arc<dyn PolicyAdjuster>, priority: Priority) -> Result<AdjusterId> {
        self.chain.register(adjuster, priority)
    }

    fn unregister_adjuster(&self, id: AdjusterId) {
        if !self.chain.unregister(id) {
            warn!("policy adjuster {:?} was not registered", id);
        }
    }

    fn update_policy(&self, cpu: usize) -> Result<()> {
        // HELD FOR THE WHOLE UPDATE: READ, APPLY AND WRITE-BACK ARE ONE STEP PER CPU
        let mut max_freq = self.max_freq.lock();
        let slot = max_freq
            .get_mut(cpu)
            .and_then(Option::as_mut)
            .ok_or_else(|| ThermalError::PolicyUpdate {
                cpu,
                reason: "no cpufreq policy".to_string(),
            })?;

        let cur_min = read_u32(&self.freq_path(cpu, "scaling_min_freq"))
            .map_err(|reason| ThermalError::PolicyUpdate { cpu, reason })?;
        let cur_max = read_u32(&self.freq_path(cpu, "scaling_max_freq"))
            .map_err(|reason| ThermalError::PolicyUpdate { cpu, reason })?;

        if cur_max != slot.written {
            let user = slot.hw.map_or(cur_max, |hw| cur_max.min(hw));
            debug!("cpu{}: scaling_max_freq changed to {} outside the daemon, new user max {}", cpu, cur_max, user);
            slot.user = user;
        }

        let mut policy = PolicyLimits::new(cpu, cur_min, slot.user);
        self.chain.apply(&mut policy);

        // THE KERNEL REJECTS min > max AT EVERY STEP: LOWER min BEFORE max,
        // RAISE max BEFORE min
        if policy.min_khz < cur_min {
            self.write_freq(cpu, "scaling_min_freq", policy.min_khz)?;
            self.write_freq(cpu, "scaling_max_freq", policy.max_khz)?;
        } else {
            self.write_freq(cpu, "scaling_max_freq", policy.max_khz)?;
            if policy.min_khz != cur_min {
                self.write_freq(cpu, "scaling_min_freq", policy.min_khz)?;
            }
        }

        // THE KERNEL MAY ROUND OR CLAMP THE WRITE: REMEMBER WHAT IT KEPT
        slot.written = read_u32(&self.freq_path(cpu, "scaling_max_freq")).unwrap_or(policy.max_khz);
        Ok(())
    }
}
