use std::io::Read;
use std::path::Path;

use anyhow::Result;

use simple_thermal::config::Config;
use simple_thermal::error::SensorError;
use simple_thermal::platform::{Platform, SensorSource};
use simple_thermal::sensor::TemperatureSampler;
use simple_thermal::sysfs::{SysfsPlatform, SysfsSensors};

const KERNEL_OPTIONS: [&str; 2] = ["CONFIG_THERMAL", "CONFIG_CPU_FREQ"];

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }

    let mut ok = true;
    for opt in KERNEL_OPTIONS {
        if config.lines().any(|l| l == format!("{}=y", opt)) {
            println!("  {:<22}OK", opt);
        } else {
            println!("  {:<22}NOT FOUND -- {} may not be available", opt,
                     if opt == "CONFIG_THERMAL" { "thermal zones" } else { "cpufreq" });
            ok = false;
        }
    }
    ok
}

fn check_path(root: &Path, rel: &str) -> bool {
    let found = root.join(rel).exists();
    println!("  {:<34}{}", rel, if found { "OK" } else { "MISSING" });
    found
}

pub fn run_check(config_path: &Path, sysfs_root: &Path) -> Result<()> {
    println!("SIMPLE-THERMAL DEPENDENCY CHECK");
    println!();

    let mut ok = true;

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("SYSFS ({}):", sysfs_root.display());
    for rel in ["class/thermal", "devices/system/cpu/possible", "devices/system/cpu/cpufreq"] {
        if !check_path(sysfs_root, rel) {
            ok = false;
        }
    }
    println!();

    println!("CONFIG ({}):", config_path.display());
    let config = match Config::load(config_path) {
        Ok(c) => {
            println!("  {} zones, poll {} ms", c.zones.len(), c.poll_ms);
            Some(c)
        }
        Err(e) => {
            println!("  INVALID: {}", e);
            ok = false;
            None
        }
    };
    println!();

    if let Some(config) = config {
        let platform = SysfsPlatform::new(sysfs_root);
        let sensors = SysfsSensors::new(sysfs_root);
        let sampler = TemperatureSampler::new(config.sensor_mode(platform.possible_cpus()));

        println!("SENSORS ({}):", sampler.label());
        for name in sampler.sensor_names() {
            match sensors.read_temp(name) {
                Ok(t) => println!("  {:<24}{}", name, t),
                Err(SensorError::NotFound(_)) => {
                    println!("  {:<24}NOT FOUND", name);
                    ok = false;
                }
                Err(e) => {
                    println!("  {:<24}UNREADABLE ({})", name, e);
                    ok = false;
                }
            }
        }
        println!();
    }

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }

    Ok(())
}
