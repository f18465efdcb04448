// SIMPLE-THERMAL CONTROL LOOP
// PERIODIC CLOSED-LOOP THERMAL MITIGATION
//
// TWO EXECUTION CONTEXTS, ZERO SHARED LOCKS:
//   CONTROL THREAD: OWNS THE SAMPLING WINDOW. SAMPLES, SMOOTHS, SELECTS A ZONE,
//                   REQUESTS A POLICY REFRESH ON EVERY ZONE CHANGE. RE-ARMS ITSELF.
//   CLAMP:          RUNS INSIDE EVERY POLICY RECALCULATION. READS THE ACTIVE
//                   ZONE AND THE ENABLED FLAG. NOTHING ELSE.
//
// ENABLE/DISABLE ARRIVES AS A MESSAGE ON THE CONTROL THREAD'S CHANNEL, SO
// WINDOW RESETS NEVER RACE A TICK. THE ENABLED ATOMIC IS STORED BY THE SENDER
// FIRST, SO THE CLAMP STOPS THROTTLING BEFORE THE MESSAGE IS EVEN READ.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::{Result, SampleError, ThermalError};
use crate::event::EventLog;
use crate::platform::{update_online_cpu_policy, Platform, SensorSource};
use crate::sensor::TemperatureSampler;
use crate::window::{PushOutcome, SamplingWindow};
use crate::zone::{select_zone, zone_label, ZoneIndex, ZoneTable};

// RAW VALUE OF "NO ZONE" IN THE ACTIVE-ZONE ATOMIC
const ZONE_NONE: u32 = u32::MAX;

// CONTROL THREAD NICE VALUE. MITIGATION MUST NOT STARVE BEHIND USER WORK.
const CONTROL_NICE: i32 = -10;

// --- SHARED STATE (ATOMICS ONLY, NO MUTEX) ---

pub struct SharedState {
    enabled: AtomicBool,
    active_zone: AtomicU32,
    pub ticks: AtomicU64,
    pub skipped_ticks: AtomicU64,
    pub transitions: AtomicU64,
    pub refresh_requests: AtomicU64,
}

impl SharedState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            active_zone: AtomicU32::new(ZONE_NONE),
            ticks: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            refresh_requests: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Release);
    }

    pub fn active_zone(&self) -> Option<ZoneIndex> {
        match self.active_zone.load(Ordering::Acquire) {
            ZONE_NONE => None,
            raw => Some(ZoneIndex::from_raw(raw)),
        }
    }

    fn set_active_zone(&self, zone: Option<ZoneIndex>) {
        let raw = zone.map_or(ZONE_NONE, ZoneIndex::raw);
        self.active_zone.store(raw, Ordering::Release);
    }
}

// --- COMMANDS ---

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    SetEnabled(bool),
    Shutdown,
}

// THE ADMINISTRATIVE SWITCH. CLONEABLE, CALLABLE FROM ANY THREAD.
#[derive(Clone)]
pub struct MitigationSwitch {
    shared: Arc<SharedState>,
    tx: Sender<Command>,
}

impl MitigationSwitch {
    pub fn enabled(&self) -> bool {
        self.shared.enabled()
    }

    // TRUE RE-ARMS FROM A CLEAN WARM-UP. FALSE LIFTS EVERY CLAMP IMMEDIATELY.
    pub fn set_enabled(&self, on: bool) {
        self.shared.set_enabled(on);
        if self.tx.send(Command::SetEnabled(on)).is_err() {
            debug!("control loop gone, switch write only updated the flag");
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

// --- LOOP STATE ---

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoopState {
    Disabled,
    WarmingUp,
    Active(Option<ZoneIndex>),
    // FATAL SENSOR LOSS. NEVER RESCHEDULES AGAIN.
    Halted,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TickOutcome {
    Disabled,
    Skipped,
    WarmingUp { percent: u32 },
    Unchanged { avg_temp: i32, zone: Option<ZoneIndex> },
    Transition { avg_temp: i32, from: Option<ZoneIndex>, to: Option<ZoneIndex>, refreshed: u64 },
}

#[derive(Clone, Copy, Debug)]
pub struct LoopTiming {
    pub poll: Duration,
    pub start_delay: Duration,
}

pub struct ControlLoop {
    sampler: TemperatureSampler,
    window: SamplingWindow,
    table: Arc<ZoneTable>,
    shared: Arc<SharedState>,
    platform: Arc<dyn Platform>,
    sensors: Arc<dyn SensorSource>,
    rx: Receiver<Command>,
    tx: Sender<Command>,
    timing: LoopTiming,
    state: LoopState,
    pub log: EventLog,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sampler: TemperatureSampler,
        window: NonZeroUsize,
        table: Arc<ZoneTable>,
        shared: Arc<SharedState>,
        platform: Arc<dyn Platform>,
        sensors: Arc<dyn SensorSource>,
        timing: LoopTiming,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let state = if shared.enabled() { LoopState::WarmingUp } else { LoopState::Disabled };
        Self {
            sampler,
            window: SamplingWindow::new(window),
            table,
            shared,
            platform,
            sensors,
            rx,
            tx,
            timing,
            state,
            log: EventLog::new(),
        }
    }

    pub fn switch(&self) -> MitigationSwitch {
        MitigationSwitch {
            shared: self.shared.clone(),
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn window(&self) -> &SamplingWindow {
        &self.window
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    // ONE TICK: SAMPLE -> PUSH -> (AVERAGE -> SELECT -> MAYBE REFRESH).
    // Err ONLY FOR FATAL SENSOR LOSS. EVERYTHING ELSE IS A LOGGED NO-OP.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        match self.state {
            LoopState::Disabled => return Ok(TickOutcome::Disabled),
            LoopState::Halted => {
                return Err(ThermalError::SensorMissing(self.sampler.label().to_string()));
            }
            LoopState::WarmingUp | LoopState::Active(_) => {}
        }

        self.shared.ticks.fetch_add(1, Ordering::Relaxed);

        let sample = match self.sampler.sample(&*self.sensors) {
            Ok(t) => t,
            Err(SampleError::SensorMissing(name)) => {
                error!("{} not found, halting thermal mitigation", name);
                self.state = LoopState::Halted;
                return Err(ThermalError::SensorMissing(name));
            }
            Err(SampleError::AggregateMissing(missing)) => {
                for name in &missing {
                    error!("{} not found", name);
                }
                self.shared.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                return Ok(TickOutcome::Skipped);
            }
            Err(e) => {
                warn!("{}", e);
                self.shared.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                return Ok(TickOutcome::Skipped);
            }
        };

        // WAIT UNTIL HISTORY IS READY
        match self.window.push(sample) {
            PushOutcome::WarmingUp { percent } => {
                info!("init {}%", percent);
                self.state = LoopState::WarmingUp;
                return Ok(TickOutcome::WarmingUp { percent });
            }
            PushOutcome::Filled => info!("init 100%"),
            PushOutcome::Ready => {}
        }

        let Some(avg_temp) = self.window.average() else {
            return Ok(TickOutcome::Skipped);
        };

        let new_zone = select_zone(avg_temp, &self.table);
        let old_zone = self.shared.active_zone();
        self.state = LoopState::Active(new_zone);

        if new_zone == old_zone {
            self.log.snapshot(avg_temp, new_zone, false);
            return Ok(TickOutcome::Unchanged { avg_temp, zone: new_zone });
        }

        info!("temp={}, zone={} -> {}", avg_temp, self.sampler.label(), zone_label(new_zone));
        self.shared.set_active_zone(new_zone);
        self.shared.transitions.fetch_add(1, Ordering::Relaxed);
        let refreshed = self.refresh_policies();
        self.log.snapshot(avg_temp, new_zone, true);

        Ok(TickOutcome::Transition { avg_temp, from: old_zone, to: new_zone, refreshed })
    }

    // APPLY ONE COMMAND. RETURNS FALSE ON SHUTDOWN.
    pub fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            // THE SENDER ALREADY STORED THE FLAG. A QUEUED MESSAGE NEVER REWRITES IT.
            Command::SetEnabled(true) => {
                if self.state == LoopState::Halted {
                    warn!("thermal mitigation halted, enable ignored until restart");
                    return true;
                }
                info!("thermal mitigation enabled, warming up");
                self.window.reset();
                self.state = LoopState::WarmingUp;
            }
            Command::SetEnabled(false) => {
                if self.state == LoopState::Disabled {
                    return true;
                }
                info!("thermal mitigation disabled");
                let had_zone = self.shared.active_zone().is_some();
                self.shared.set_active_zone(None);
                if self.state != LoopState::Halted {
                    self.state = LoopState::Disabled;
                }
                // LIFT ANY CEILING STILL APPLIED FROM THE LAST ZONE
                if had_zone {
                    self.refresh_policies();
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn refresh_policies(&self) -> u64 {
        let issued = update_online_cpu_policy(&*self.platform);
        self.shared.refresh_requests.fetch_add(issued, Ordering::Relaxed);
        issued
    }

    // SELF RE-ARMING DRIVER. TICKS ON A FIXED DEADLINE, DRAINS COMMANDS IN
    // BETWEEN. AN ENABLE RE-ARMS IMMEDIATELY. AFTER FATAL SENSOR LOSS IT STOPS
    // TICKING BUT KEEPS SERVING COMMANDS, SO A DISABLE STILL LIFTS THE CLAMP.
    // RETURNS THAT Err AT SHUTDOWN.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut fatal = None;
        let start = Instant::now() + self.timing.start_delay;
        let mut next_tick = match self.state {
            LoopState::Disabled | LoopState::Halted => None,
            _ => Some(start),
        };

        while !shutdown.load(Ordering::Relaxed) {
            // DISABLED: NO TICKS, WAKE EVERY POLL INTERVAL TO NOTICE SHUTDOWN
            let deadline = next_tick.unwrap_or_else(|| Instant::now() + self.timing.poll);

            match self.rx.recv_deadline(deadline) {
                Ok(cmd) => {
                    if !self.handle(cmd) {
                        break;
                    }
                    next_tick = match (cmd, self.state) {
                        (_, LoopState::Disabled | LoopState::Halted) => None,
                        (Command::SetEnabled(true), _) => Some(Instant::now()),
                        _ => next_tick,
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    if next_tick.is_none() {
                        continue;
                    }
                    match self.tick() {
                        Ok(_) => {
                            next_tick = Some((deadline + self.timing.poll).max(Instant::now()));
                        }
                        // FATAL: STOP RESCHEDULING. THE CLAMP KEEPS THE LAST ZONE UNTIL DISABLED.
                        Err(e) => {
                            warn!(
                                "control loop halted, holding zone {} until disabled",
                                zone_label(self.shared.active_zone())
                            );
                            fatal = Some(e);
                            next_tick = None;
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // RUN ON A DEDICATED, PRIORITIZED THREAD
    pub fn spawn(
        mut self,
        shutdown: &'static AtomicBool,
    ) -> Result<std::thread::JoinHandle<(ControlLoop, Result<()>)>> {
        std::thread::Builder::new()
            .name("thermal-ctl".to_string())
            .spawn(move || {
                raise_priority();
                let res = self.run(shutdown);
                (self, res)
            })
            .map_err(|e| ThermalError::ResourceExhausted(format!("control thread: {}", e)))
    }
}

// BEST EFFORT: LOWER THE NICE VALUE OF THE CALLING THREAD
fn raise_priority() {
    let ret = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, CONTROL_NICE)
    };
    if ret != 0 {
        debug!(
            "could not raise control thread priority: {}",
            std::io::Error::last_os_error()
        );
    }
}
