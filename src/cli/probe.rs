// THERMAL PROBE -- RUNS THE SMOOTHING AND ZONE SELECTION WITHOUT CLAMPING
// ONE LINE PER POLL: RAW SAMPLE, WINDOW AVERAGE, ZONE THE DAEMON WOULD PICK

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};

use simple_thermal::config::Config;
use simple_thermal::platform::Platform;
use simple_thermal::sensor::TemperatureSampler;
use simple_thermal::sysfs::{SysfsPlatform, SysfsSensors};
use simple_thermal::window::{PushOutcome, SamplingWindow};
use simple_thermal::zone::{select_zone, zone_label};

static RUNNING: AtomicBool = AtomicBool::new(true);

pub fn run_probe(config_path: &Path, sysfs_root: &Path) -> Result<()> {
    ctrlc::set_handler(move || {
        RUNNING.store(false, Ordering::Relaxed);
    })
    .ok();

    let config = Config::load(config_path)?;
    let table = config.zone_table()?;
    let platform = SysfsPlatform::new(sysfs_root);
    let sensors = SysfsSensors::new(sysfs_root);
    let sampler = TemperatureSampler::new(config.sensor_mode(platform.possible_cpus()));
    let mut window = SamplingWindow::new(config.window_size());
    let poll = config.timing().poll;

    println!("{:<10} {:<10} {:<6}", "SAMPLE", "AVG", "ZONE");

    while RUNNING.load(Ordering::Relaxed) {
        match sampler.sample(&sensors) {
            Ok(t) => match window.push(t) {
                PushOutcome::WarmingUp { percent } => println!("{:<10} init {}%", t, percent),
                PushOutcome::Filled | PushOutcome::Ready => {
                    let avg = window.average().unwrap_or(t);
                    println!("{:<10} {:<10} {:<6}", t, avg, zone_label(select_zone(avg, &table)));
                }
            },
            Err(e) if e.is_fatal() => bail!("{}", e),
            Err(e) => println!("{:<10} ({})", "-", e),
        }
        std::thread::sleep(poll);
    }

    Ok(())
}
