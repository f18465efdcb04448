// SIMPLE-THERMAL CONTROL LOOP TESTS
// TICK SEMANTICS, POLICY REFRESH FAN-OUT, ENABLE/DISABLE, SENSOR LOSS
//
// IN-MEMORY PLATFORM AND SENSORS. NO SYSFS, NO ROOT.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use simple_thermal::clamp::FrequencyClamp;
use simple_thermal::config::Config;
use simple_thermal::control::{ControlLoop, LoopState, LoopTiming, SharedState, TickOutcome};
use simple_thermal::driver::ThermalDriver;
use simple_thermal::error::{SensorError, ThermalError};
use simple_thermal::platform::{
    AdjusterId, ClusterMap, Platform, PolicyAdjuster, PolicyChain, PolicyLimits, Priority,
    SensorSource,
};
use simple_thermal::sensor::{SensorMode, TemperatureSampler};
use simple_thermal::zone::{Cluster, ClusterCeilings, ZoneDefinition, ZoneTable};

const USER_MAX: u32 = 2_800_000;
const USER_MIN: u32 = 300_000;

// --- FAKES ---

struct FakeSensors {
    temps: Mutex<HashMap<String, i32>>,
}

impl FakeSensors {
    fn new() -> Arc<Self> {
        Arc::new(Self { temps: Mutex::new(HashMap::new()) })
    }

    fn set(&self, name: &str, t: i32) {
        self.temps.lock().insert(name.to_string(), t);
    }

    fn remove(&self, name: &str) {
        self.temps.lock().remove(name);
    }
}

impl SensorSource for FakeSensors {
    fn read_temp(&self, name: &str) -> Result<i32, SensorError> {
        self.temps
            .lock()
            .get(name)
            .copied()
            .ok_or_else(|| SensorError::NotFound(name.to_string()))
    }
}

struct FakePlatform {
    online: Vec<bool>,
    clusters: Vec<Cluster>,
    chain: PolicyChain,
    limits: Mutex<Vec<PolicyLimits>>,
    updates: Mutex<Vec<usize>>,
}

impl FakePlatform {
    // 0-1 LITTLE, 2 BIG, 3 PRIME
    fn new(online: Vec<bool>) -> Arc<Self> {
        let n = online.len();
        let clusters = (0..n)
            .map(|cpu| match cpu {
                0 | 1 => Cluster::Little,
                2 => Cluster::Big,
                _ => Cluster::Prime,
            })
            .collect();
        let limits = (0..n).map(|cpu| PolicyLimits::new(cpu, USER_MIN, USER_MAX)).collect();
        Arc::new(Self {
            online,
            clusters,
            chain: PolicyChain::new(),
            limits: Mutex::new(limits),
            updates: Mutex::new(Vec::new()),
        })
    }

    fn max_of(&self, cpu: usize) -> u32 {
        self.limits.lock()[cpu].max_khz
    }

    fn take_updates(&self) -> Vec<usize> {
        std::mem::take(&mut *self.updates.lock())
    }
}

impl Platform for FakePlatform {
    fn possible_cpus(&self) -> usize {
        self.online.len()
    }

    fn is_online(&self, cpu: usize) -> bool {
        self.online.get(cpu).copied().unwrap_or(false)
    }

    fn cluster_of(&self, cpu: usize) -> Cluster {
        self.clusters[cpu]
    }

    fn register_adjuster(
        &self,
        adjuster: Arc<dyn PolicyAdjuster>,
        priority: Priority,
    ) -> simple_thermal::error::Result<AdjusterId> {
        self.chain.register(adjuster, priority)
    }

    fn unregister_adjuster(&self, id: AdjusterId) {
        self.chain.unregister(id);
    }

    fn update_policy(&self, cpu: usize) -> simple_thermal::error::Result<()> {
        self.updates.lock().push(cpu);
        let mut p = PolicyLimits::new(cpu, USER_MIN, USER_MAX);
        self.chain.apply(&mut p);
        self.limits.lock()[cpu] = p;
        Ok(())
    }
}

// --- HARNESS ---

fn table() -> Arc<ZoneTable> {
    let zone = |l, b, p, trip| ZoneDefinition {
        ceilings: ClusterCeilings { little_khz: l, big_khz: b, prime_khz: p },
        trip_temp: trip,
    };
    Arc::new(
        ZoneTable::new(vec![
            zone(1_800_000, 2_000_000, 2_400_000, 40),
            zone(1_000_000, 1_200_000, 1_400_000, 50),
        ])
        .unwrap(),
    )
}

struct Rig {
    ctl: ControlLoop,
    platform: Arc<FakePlatform>,
    sensors: Arc<FakeSensors>,
}

fn rig(mode: SensorMode, online: Vec<bool>) -> Rig {
    let platform = FakePlatform::new(online);
    let sensors = FakeSensors::new();
    let table = table();
    let shared = Arc::new(SharedState::new(true));
    let clusters = Arc::new(ClusterMap::from_topology(&*platform));

    let clamp = Arc::new(FrequencyClamp::new(table.clone(), shared.clone(), clusters));
    platform.register_adjuster(clamp, Priority::LeastOverridable).unwrap();

    let ctl = ControlLoop::new(
        TemperatureSampler::new(mode),
        NonZeroUsize::new(5).unwrap(),
        table,
        shared,
        platform.clone(),
        sensors.clone(),
        LoopTiming { poll: Duration::from_millis(5), start_delay: Duration::ZERO },
    );
    Rig { ctl, platform, sensors }
}

fn single() -> SensorMode {
    SensorMode::Single("skin".to_string())
}

fn feed(r: &mut Rig, temps: &[i32]) -> Vec<TickOutcome> {
    temps
        .iter()
        .map(|&t| {
            r.sensors.set("skin", t);
            r.ctl.tick().unwrap()
        })
        .collect()
}

// --- TICKS ---

#[test]
fn first_decision_after_warmup() {
    let mut r = rig(single(), vec![true; 4]);
    let out = feed(&mut r, &[38, 39, 41, 42]);
    assert!(out.iter().all(|o| matches!(o, TickOutcome::WarmingUp { .. })));
    assert!(r.platform.take_updates().is_empty());

    let out = feed(&mut r, &[43]);
    match out[0] {
        TickOutcome::Transition { avg_temp, from, to, refreshed } => {
            assert_eq!(avg_temp, 40);
            assert_eq!(from, None);
            assert_eq!(to.map(|z| z.get()), Some(0));
            assert_eq!(refreshed, 4);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(r.ctl.state(), LoopState::Active(r.ctl.shared().active_zone()));

    // PER-CLUSTER CEILINGS APPLIED
    assert_eq!(r.platform.max_of(0), 1_800_000);
    assert_eq!(r.platform.max_of(2), 2_000_000);
    assert_eq!(r.platform.max_of(3), 2_400_000);
}

#[test]
fn one_refresh_per_online_cpu() {
    let mut r = rig(single(), vec![true, false, true, true, false, true]);
    feed(&mut r, &[60; 5]);
    let mut updates = r.platform.take_updates();
    updates.sort_unstable();
    assert_eq!(updates, vec![0, 2, 3, 5]);
    assert_eq!(r.ctl.shared().refresh_requests.load(Ordering::Relaxed), 4);
}

#[test]
fn unchanged_zone_issues_no_refresh() {
    let mut r = rig(single(), vec![true; 4]);
    feed(&mut r, &[45; 5]);
    r.platform.take_updates();

    let out = feed(&mut r, &[46, 44, 48]);
    assert!(out.iter().all(|o| matches!(o, TickOutcome::Unchanged { .. })));
    assert!(r.platform.take_updates().is_empty());
    assert_eq!(r.ctl.shared().transitions.load(Ordering::Relaxed), 1);
}

#[test]
fn cooling_down_lifts_ceiling() {
    let mut r = rig(single(), vec![true; 4]);
    feed(&mut r, &[60; 5]);
    assert_eq!(r.platform.max_of(3), 1_400_000);

    let out = feed(&mut r, &[20; 5]);
    assert!(matches!(out.last(), Some(TickOutcome::Transition { to: None, .. })));
    assert_eq!(r.platform.max_of(3), USER_MAX);
}

#[test]
fn aggregate_miss_skips_tick_without_pushing() {
    let mode = SensorMode::Aggregate { pattern: "cpu-1-{cpu}-usr".to_string(), cpu_count: 2 };
    let mut r = rig(mode, vec![true; 4]);
    r.sensors.set("cpu-1-0-usr", 40);
    r.sensors.set("cpu-1-1-usr", 42);

    r.ctl.tick().unwrap();
    assert_eq!(r.ctl.window().cursor(), 1);

    r.sensors.remove("cpu-1-1-usr");
    assert_eq!(r.ctl.tick().unwrap(), TickOutcome::Skipped);
    assert_eq!(r.ctl.window().cursor(), 1);
    assert_eq!(r.ctl.shared().skipped_ticks.load(Ordering::Relaxed), 1);

    // RECOVERS ON ITS OWN
    r.sensors.set("cpu-1-1-usr", 42);
    assert!(matches!(r.ctl.tick().unwrap(), TickOutcome::WarmingUp { percent: 40 }));
}

#[test]
fn single_sensor_loss_halts() {
    let mut r = rig(single(), vec![true; 4]);
    feed(&mut r, &[60; 5]);
    let zone = r.ctl.shared().active_zone();
    assert!(zone.is_some());

    r.sensors.remove("skin");
    assert!(matches!(r.ctl.tick(), Err(ThermalError::SensorMissing(_))));
    assert_eq!(r.ctl.state(), LoopState::Halted);

    // LAST ZONE STAYS IN FORCE
    assert_eq!(r.ctl.shared().active_zone(), zone);
    assert_eq!(r.platform.max_of(0), 1_000_000);

    // AN ENABLE DOES NOT REVIVE A HALTED LOOP
    r.sensors.set("skin", 60);
    r.ctl.switch().set_enabled(true);
    assert!(r.ctl.tick().is_err());
}

// --- ENABLE / DISABLE ---

#[test]
fn disable_lifts_clamp_immediately() {
    let mut r = rig(single(), vec![true; 4]);
    feed(&mut r, &[60; 5]);
    assert_eq!(r.platform.max_of(1), 1_000_000);

    // THE FLAG ALONE ALREADY TURNS THE CLAMP OFF
    let switch = r.ctl.switch();
    switch.set_enabled(false);
    assert!(!switch.enabled());
    r.platform.update_policy(1).unwrap();
    assert_eq!(r.platform.max_of(1), USER_MAX);
}

#[test]
fn disable_during_warmup_then_reenable_restarts_warmup() {
    let mut r = rig(single(), vec![true; 4]);
    feed(&mut r, &[41, 42, 43]);
    assert_eq!(r.ctl.window().cursor(), 3);

    let switch = r.ctl.switch();
    switch.set_enabled(false);
    assert!(r.ctl.handle(simple_thermal::control::Command::SetEnabled(false)));
    assert_eq!(r.ctl.state(), LoopState::Disabled);
    assert_eq!(r.ctl.tick().unwrap(), TickOutcome::Disabled);

    switch.set_enabled(true);
    assert!(r.ctl.handle(simple_thermal::control::Command::SetEnabled(true)));
    assert_eq!(r.ctl.state(), LoopState::WarmingUp);
    assert_eq!(r.ctl.window().cursor(), 0);

    let out = feed(&mut r, &[41]);
    assert_eq!(out[0], TickOutcome::WarmingUp { percent: 20 });
}

#[test]
fn disable_clears_active_zone_and_refreshes() {
    let mut r = rig(single(), vec![true; 4]);
    feed(&mut r, &[60; 5]);
    r.platform.take_updates();

    r.ctl.switch().set_enabled(false);
    r.ctl.handle(simple_thermal::control::Command::SetEnabled(false));
    assert_eq!(r.ctl.shared().active_zone(), None);
    assert_eq!(r.platform.take_updates().len(), 4);
    assert_eq!(r.platform.max_of(3), USER_MAX);
}

#[test]
fn queued_enable_never_overrides_newer_disable() {
    let mut r = rig(single(), vec![true; 4]);
    let switch = r.ctl.switch();
    switch.set_enabled(true);
    switch.set_enabled(false);

    // THE LOOP CATCHES UP ON THE OLDER ENABLE FIRST
    r.ctl.handle(simple_thermal::control::Command::SetEnabled(true));
    assert!(!r.ctl.shared().enabled());
    r.ctl.handle(simple_thermal::control::Command::SetEnabled(false));
    assert!(!r.ctl.shared().enabled());
    assert_eq!(r.ctl.state(), LoopState::Disabled);
}

// --- THREADED ---

static LOOP_SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[test]
fn spawned_loop_routes_commands() {
    let r = rig(single(), vec![true; 4]);
    r.sensors.set("skin", 60);
    let platform = r.platform.clone();
    let switch = r.ctl.switch();
    let handle = r.ctl.spawn(&LOOP_SHUTDOWN).unwrap();

    // 5 TICKS AT 5MS, GENEROUS MARGIN
    let mut waited = Duration::ZERO;
    while platform.max_of(0) != 1_000_000 && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    assert_eq!(platform.max_of(0), 1_000_000);

    switch.set_enabled(false);
    let mut waited = Duration::ZERO;
    while platform.max_of(0) != USER_MAX && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    assert_eq!(platform.max_of(0), USER_MAX);

    switch.shutdown();
    let (ctl, res) = handle.join().unwrap();
    assert!(res.is_ok());
    assert_eq!(ctl.state(), LoopState::Disabled);
    assert!(!ctl.log.is_empty());
}

// --- DRIVER LIFECYCLE ---

static DRIVER_SHUTDOWN: AtomicBool = AtomicBool::new(false);

const CONFIG: &str = r#"{
    "poll_ms": 5,
    "thermal_zone": "skin",
    "zones": [
        { "index": 0, "little_khz": 1800000, "big_khz": 2000000, "prime_khz": 2400000, "trip_temp": 40 },
        { "index": 1, "little_khz": 1000000, "big_khz": 1200000, "prime_khz": 1400000, "trip_temp": 50 }
    ]
}"#;

#[test]
fn driver_restores_limits_on_drop() {
    let config = Config::parse(CONFIG).unwrap();
    let platform = FakePlatform::new(vec![true; 4]);
    let sensors = FakeSensors::new();
    sensors.set("skin", 60);

    let mut driver =
        ThermalDriver::init(&config, platform.clone(), sensors.clone(), &DRIVER_SHUTDOWN).unwrap();
    assert_eq!(platform.chain.len(), 1);

    let mut waited = Duration::ZERO;
    while platform.max_of(2) != 1_200_000 && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    assert_eq!(platform.max_of(2), 1_200_000);

    driver.stop().unwrap();
    assert!(!driver.log.is_empty());
    drop(driver);

    assert!(platform.chain.is_empty());
    assert_eq!(platform.max_of(2), USER_MAX);
}

#[test]
fn second_driver_cannot_take_the_slot() {
    static SHUTDOWN: AtomicBool = AtomicBool::new(false);
    let config = Config::parse(CONFIG).unwrap();
    let platform = FakePlatform::new(vec![true; 2]);
    let sensors = FakeSensors::new();
    sensors.set("skin", 20);

    let _first = ThermalDriver::init(&config, platform.clone(), sensors.clone(), &SHUTDOWN).unwrap();
    let second = ThermalDriver::init(&config, platform.clone(), sensors, &SHUTDOWN);
    assert!(matches!(second, Err(ThermalError::NotifierRegistrationFailed(_))));
    assert_eq!(platform.chain.len(), 1);
}

fn wait_for(what: impl Fn() -> bool) -> bool {
    let mut waited = Duration::ZERO;
    while !what() && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    what()
}

#[test]
fn disable_after_sensor_loss_lifts_clamp() {
    static SHUTDOWN: AtomicBool = AtomicBool::new(false);
    let config = Config::parse(CONFIG).unwrap();
    let platform = FakePlatform::new(vec![true; 4]);
    let sensors = FakeSensors::new();
    sensors.set("skin", 60);

    let mut driver =
        ThermalDriver::init(&config, platform.clone(), sensors.clone(), &SHUTDOWN).unwrap();
    assert!(wait_for(|| platform.max_of(0) == 1_000_000));

    // HALT: THE LAST ZONE STAYS IN FORCE
    sensors.remove("skin");
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(platform.max_of(0), 1_000_000);
    assert!(!driver.finished());

    driver.switch().set_enabled(false);
    assert!(wait_for(|| platform.max_of(0) == USER_MAX));
    assert_eq!(driver.shared().active_zone(), None);

    // THE HALT IS STILL REPORTED AT SHUTDOWN
    assert!(matches!(driver.stop(), Err(ThermalError::SensorMissing(_))));
}
