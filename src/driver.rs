// SIMPLE-THERMAL DRIVER
// WIRES THE PIECES TOGETHER: CONFIGURE, REGISTER, SPAWN, MONITOR, SHUTDOWN
//
// INIT ORDER: ZONE TABLE -> CLUSTER MAP -> SHARED STATE -> CLAMP REGISTRATION
// -> CONTROL THREAD. A FAILURE AT ANY STEP DROPS EVERYTHING ALREADY ACQUIRED,
// IN REVERSE ORDER. NOTHING HALF-STARTED KEEPS RUNNING.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};

use crate::clamp::FrequencyClamp;
use crate::config::Config;
use crate::control::{ControlLoop, MitigationSwitch, SharedState};
use crate::error::{Result, ThermalError};
use crate::event::EventLog;
use crate::platform::{
    update_online_cpu_policy, AdjusterId, ClusterMap, Platform, Priority, SensorSource,
};
use crate::sensor::TemperatureSampler;

// UNREGISTERS THE CLAMP ON DROP AND LIFTS WHATEVER IT LAST APPLIED
struct Registration {
    platform: Arc<dyn Platform>,
    id: AdjusterId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.platform.unregister_adjuster(self.id);
        update_online_cpu_policy(&*self.platform);
    }
}

pub struct ThermalDriver {
    clusters: Arc<ClusterMap>,
    shared: Arc<SharedState>,
    switch: MitigationSwitch,
    handle: Option<JoinHandle<(ControlLoop, Result<()>)>>,
    // DROPPED AFTER Drop::drop HAS JOINED THE THREAD
    _registration: Registration,
    pub log: EventLog,
}

impl ThermalDriver {
    pub fn init(
        config: &Config,
        platform: Arc<dyn Platform>,
        sensors: Arc<dyn SensorSource>,
        shutdown: &'static AtomicBool,
    ) -> Result<Self> {
        let table = Arc::new(config.zone_table()?);

        let possible = platform.possible_cpus();
        let clusters = match config.cluster_map(possible)? {
            Some(map) => map,
            None => ClusterMap::from_topology(&*platform),
        };
        let clusters = Arc::new(clusters);

        let shared = Arc::new(SharedState::new(config.enabled));

        // LEAST OVERRIDABLE SO NO OTHER POLICY ADJUSTER CAN UNDO THROTTLING
        let clamp = Arc::new(FrequencyClamp::new(table.clone(), shared.clone(), clusters.clone()));
        let id = platform.register_adjuster(clamp, Priority::LeastOverridable)?;
        let registration = Registration { platform: platform.clone(), id };

        let sampler = TemperatureSampler::new(config.sensor_mode(possible));
        info!(
            "{} zones, window {}, poll {}ms, sensor {}",
            table.len(),
            config.window_size(),
            config.poll_ms,
            sampler.label()
        );

        let control = ControlLoop::new(
            sampler,
            config.window_size(),
            table,
            shared.clone(),
            platform,
            sensors,
            config.timing(),
        );
        let switch = control.switch();

        // ON FAILURE `registration` DROPS HERE AND UNREGISTERS THE CLAMP
        let handle = control.spawn(shutdown)?;

        Ok(Self {
            clusters,
            shared,
            switch,
            handle: Some(handle),
            _registration: registration,
            log: EventLog::new(),
        })
    }

    pub fn switch(&self) -> MitigationSwitch {
        self.switch.clone()
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn clusters(&self) -> &ClusterMap {
        &self.clusters
    }

    pub fn finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    // BLOCK UNTIL SHUTDOWN. A HALTED LOOP KEEPS SERVING ENABLE/DISABLE
    // UNTIL THEN. Err IF THE LOOP HALTED (FATAL SENSOR LOSS).
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) && !self.finished() {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
        self.stop()
    }

    // STOP THE CONTROL THREAD AND COLLECT ITS EVENT LOG
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.switch.shutdown();
        match handle.join() {
            Ok((control, res)) => {
                self.log = control.log;
                res
            }
            Err(_) => {
                warn!("control thread panicked");
                Err(ThermalError::ResourceExhausted("control thread panicked".to_string()))
            }
        }
    }
}

impl Drop for ThermalDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}
