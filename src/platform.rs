// SIMPLE-THERMAL PLATFORM COLLABORATORS
// EVERYTHING THE CONTROL LOOP CONSUMES BUT DOES NOT OWN:
//   SENSOR QUERIES, CPU TOPOLOGY, POLICY RE-EVALUATION, ADJUSTER REGISTRATION.
// sysfs.rs IMPLEMENTS THESE FOR LINUX. THE TESTS IMPLEMENT THEM IN MEMORY.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ConfigError, Result, SensorError, ThermalError};
use crate::zone::Cluster;

// --- SENSORS ---

pub trait SensorSource: Send + Sync {
    // SIGNED TEMPERATURE OF THE NAMED SENSOR, OR NotFound
    fn read_temp(&self, name: &str) -> std::result::Result<i32, SensorError>;
}

// --- POLICY ---

// THE ALLOWED FREQUENCY RANGE OF ONE CPU WHILE IT IS BEING RECALCULATED
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PolicyLimits {
    pub cpu: usize,
    pub min_khz: u32,
    pub max_khz: u32,
    // THE MAXIMUM THE USER ASKED FOR, BEFORE ANY ADJUSTER RAN
    pub user_max_khz: u32,
}

impl PolicyLimits {
    pub fn new(cpu: usize, min_khz: u32, user_max_khz: u32) -> Self {
        Self { cpu, min_khz, max_khz: user_max_khz, user_max_khz }
    }
}

// CALLED SYNCHRONOUSLY WHILE A POLICY IS RECALCULATED.
// MUST NOT BLOCK, ALLOCATE OR FAIL.
pub trait PolicyAdjuster: Send + Sync {
    fn adjust(&self, policy: &mut PolicyLimits);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Priority {
    // HIGHER RUNS FIRST
    Normal(i32),
    // RUNS AFTER EVERY Normal ADJUSTER. NOTHING CAN UNDO IT. ONE HOLDER ONLY.
    LeastOverridable,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct AdjusterId(u64);

struct Entry {
    id: AdjusterId,
    priority: Priority,
    adjuster: Arc<dyn PolicyAdjuster>,
}

// ORDERED ADJUSTER LIST. WRITES ONLY AT REGISTRATION, READS ON EVERY UPDATE.
// NO ADJUSTER EVER TAKES THIS LOCK ITSELF.
pub struct PolicyChain {
    entries: RwLock<Vec<Entry>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn register(&self, adjuster: Arc<dyn PolicyAdjuster>, priority: Priority) -> Result<AdjusterId> {
        let mut entries = self.entries.write();

        if priority == Priority::LeastOverridable
            && entries.iter().any(|e| e.priority == Priority::LeastOverridable)
        {
            return Err(ThermalError::NotifierRegistrationFailed(
                "least-overridable slot already taken".to_string(),
            ));
        }

        let id = AdjusterId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        let entry = Entry { id, priority, adjuster };

        // KEEP SORTED: Normal BY DESCENDING PRIORITY, LeastOverridable LAST
        let pos = entries
            .iter()
            .position(|e| runs_before(priority, e.priority))
            .unwrap_or(entries.len());
        entries.insert(pos, entry);
        Ok(id)
    }

    pub fn unregister(&self, id: AdjusterId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn apply(&self, policy: &mut PolicyLimits) {
        for e in self.entries.read().iter() {
            e.adjuster.adjust(policy);
        }
    }
}

impl Default for PolicyChain {
    fn default() -> Self {
        Self::new()
    }
}

// TRUE IF `a` MUST RUN STRICTLY BEFORE `b`. EQUAL PRIORITIES KEEP INSERTION ORDER.
fn runs_before(a: Priority, b: Priority) -> bool {
    match (a, b) {
        (Priority::Normal(x), Priority::Normal(y)) => x > y,
        (Priority::Normal(_), Priority::LeastOverridable) => true,
        (Priority::LeastOverridable, _) => false,
    }
}

// --- PLATFORM ---

pub trait Platform: Send + Sync {
    fn possible_cpus(&self) -> usize;
    fn is_online(&self, cpu: usize) -> bool;
    fn cluster_of(&self, cpu: usize) -> Cluster;

    fn register_adjuster(&self, adjuster: Arc<dyn PolicyAdjuster>, priority: Priority) -> Result<AdjusterId>;
    fn unregister_adjuster(&self, id: AdjusterId);

    // RECALCULATE ONE CPU'S LIMITS, RUNNING EVERY REGISTERED ADJUSTER
    fn update_policy(&self, cpu: usize) -> Result<()>;
}

// ASK THE PLATFORM TO RE-EVALUATE EVERY ONLINE CPU EXACTLY ONCE.
// RETURNS THE NUMBER OF REQUESTS ISSUED. FAILURES ARE LOGGED, NOT FATAL.
pub fn update_online_cpu_policy(platform: &dyn Platform) -> u64 {
    let mut issued = 0;
    for cpu in 0..platform.possible_cpus() {
        if !platform.is_online(cpu) {
            continue;
        }
        issued += 1;
        if let Err(e) = platform.update_policy(cpu) {
            log::warn!("{}", e);
        }
    }
    issued
}

// --- CLUSTER MAP ---

// IMMUTABLE CPU -> CLUSTER SNAPSHOT. INDEXED LOOKUP, NO ALLOCATION.
// CPUS OUTSIDE THE MAP FALL BACK TO PRIME, LIKE ANY CPU IN NEITHER
// THE LITTLE NOR THE BIG MASK.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterMap {
    clusters: Box<[Cluster]>,
}

impl ClusterMap {
    pub fn from_topology(platform: &dyn Platform) -> Self {
        let clusters = (0..platform.possible_cpus())
            .map(|cpu| platform.cluster_of(cpu))
            .collect::<Vec<_>>();
        Self { clusters: clusters.into_boxed_slice() }
    }

    // EXPLICIT CPU LISTS. A CPU IN NO LIST IS PRIME.
    pub fn from_lists(nr_cpus: usize, little: &[usize], big: &[usize]) -> Self {
        let mut clusters = vec![Cluster::Prime; nr_cpus];
        for &cpu in big {
            if let Some(c) = clusters.get_mut(cpu) {
                *c = Cluster::Big;
            }
        }
        // LITTLE WINS OVER BIG, SAME ORDER AS THE MASK TESTS
        for &cpu in little {
            if let Some(c) = clusters.get_mut(cpu) {
                *c = Cluster::Little;
            }
        }
        Self { clusters: clusters.into_boxed_slice() }
    }

    pub fn cluster_of(&self, cpu: usize) -> Cluster {
        self.clusters.get(cpu).copied().unwrap_or(Cluster::Prime)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cpus_in(&self, cluster: Cluster) -> Vec<usize> {
        self.clusters
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == cluster)
            .map(|(cpu, _)| cpu)
            .collect()
    }
}

// --- CPU LIST PARSING ---

// KERNEL CPU LIST SYNTAX: "0-3,6,8-9". EMPTY STRING IS AN EMPTY LIST.
pub fn parse_cpu_list(raw: &str) -> std::result::Result<Vec<usize>, ConfigError> {
    let bad = |reason: &str| ConfigError::CpuList {
        list: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut cpus = Vec::new();
    let raw_trim = raw.trim();
    if raw_trim.is_empty() {
        return Ok(cpus);
    }

    for range in raw_trim.split(',') {
        let parts: Vec<&str> = range.trim().split('-').collect();
        match parts.len() {
            1 => {
                let cpu = parts[0].parse::<usize>().map_err(|_| bad("not a number"))?;
                cpus.push(cpu);
            }
            2 => {
                let lo = parts[0].parse::<usize>().map_err(|_| bad("not a number"))?;
                let hi = parts[1].parse::<usize>().map_err(|_| bad("not a number"))?;
                if hi < lo {
                    return Err(bad("descending range"));
                }
                cpus.extend(lo..=hi);
            }
            _ => return Err(bad("malformed range")),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}
