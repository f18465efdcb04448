// SIMPLE-THERMAL v1.0.0 -- CPU THERMAL MITIGATION DAEMON
// SMOOTHED TEMPERATURE -> MITIGATION ZONE -> PER-CLUSTER FREQUENCY CEILING
//
// THROTTLING DECISIONS HAPPEN IN THE CONTROL THREAD AND THE POLICY CLAMP.
// THIS BINARY HANDLES: CONFIGURATION, THE CONTROL FILE, MONITORING, REPORTING

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use simple_thermal::config::{Config, DEFAULT_CONFIG_PATH};
use simple_thermal::driver::ThermalDriver;
use simple_thermal::switch::{SwitchWatcher, DEFAULT_CONTROL_PATH};
use simple_thermal::sysfs::{SysfsPlatform, SysfsSensors, DEFAULT_SYSFS_ROOT};
use simple_thermal::zone::Cluster;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "simple-thermal")]
#[command(about = "SIMPLE-THERMAL -- CLOSED-LOOP CPU THERMAL MITIGATION")]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(clap::Args, Clone)]
struct RunArgs {
    // PLATFORM DESCRIPTION (JSON)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    // CONTROL FILE: WRITE 0/1 TO DISABLE/ENABLE MITIGATION AT RUNTIME
    #[arg(long, default_value = DEFAULT_CONTROL_PATH)]
    control: PathBuf,

    // SYSFS MOUNT POINT
    #[arg(long, default_value = DEFAULT_SYSFS_ROOT)]
    sysfs_root: PathBuf,

    // PRINT VERBOSE OUTPUT
    #[arg(long)]
    verbose: bool,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

#[derive(Subcommand)]
enum Cmd {
    // RUN THE MITIGATION DAEMON (DEFAULT)
    Run(RunArgs),
    // CHECK KERNEL CONFIG, SYSFS LAYOUT AND CONFIGURED SENSORS
    Check(RunArgs),
    // PRINT THE SMOOTHED TEMPERATURE AND SELECTED ZONE EVERY POLL INTERVAL
    Probe(RunArgs),
    // PRINT THE CPUS OF EACH CLUSTER
    Clusters(RunArgs),
    // ENABLE MITIGATION IN A RUNNING DAEMON
    Enable {
        #[arg(long, default_value = DEFAULT_CONTROL_PATH)]
        control: PathBuf,
    },
    // DISABLE MITIGATION IN A RUNNING DAEMON (LIFTS ALL CEILINGS)
    Disable {
        #[arg(long, default_value = DEFAULT_CONTROL_PATH)]
        control: PathBuf,
    },
    // PRINT WHETHER MITIGATION IS ENABLED
    Status {
        #[arg(long, default_value = DEFAULT_CONTROL_PATH)]
        control: PathBuf,
    },
}

fn init_logger(verbose: bool) -> Result<()> {
    let level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        level,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run(cli.run),
        Some(Cmd::Run(args)) => run(args),
        Some(Cmd::Check(args)) => {
            init_logger(args.verbose)?;
            cli::check::run_check(&args.config, &args.sysfs_root)
        }
        Some(Cmd::Probe(args)) => {
            init_logger(args.verbose)?;
            cli::probe::run_probe(&args.config, &args.sysfs_root)
        }
        Some(Cmd::Clusters(args)) => cli::clusters::run_clusters(&args.config, &args.sysfs_root),
        Some(Cmd::Enable { control }) => cli::switch::run_set(&control, true),
        Some(Cmd::Disable { control }) => cli::switch::run_set(&control, false),
        Some(Cmd::Status { control }) => cli::switch::run_status(&control),
    }
}

fn run(args: RunArgs) -> Result<()> {
    init_logger(args.verbose)?;

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let config = Config::load(&args.config)?;
    let platform = Arc::new(SysfsPlatform::new(&args.sysfs_root));
    let sensors = Arc::new(SysfsSensors::new(&args.sysfs_root));

    println!("SIMPLE-THERMAL v1.0.0");
    println!("CONFIG:          {}", args.config.display());
    println!("CONTROL FILE:    {}", args.control.display());
    println!("ZONES:           {}", config.zones.len());
    println!("POLL:            {} ms (start delay {} s)", config.poll_ms, config.start_delay_s);
    println!("WINDOW:          {}", config.window_size());
    println!("ENABLED:         {}", config.enabled);
    println!("VERBOSE:         {}", args.verbose);
    println!();

    let mut driver = ThermalDriver::init(&config, platform, sensors, &SHUTDOWN)?;

    let counts: Vec<String> = Cluster::ALL
        .iter()
        .map(|&c| format!("{} {}", c.label(), driver.clusters().cpus_in(c).len()))
        .collect();
    println!("CLUSTERS:        {}", counts.join(" / "));

    let watcher = SwitchWatcher::create(&args.control, config.enabled)?;
    let switch = driver.switch();
    let watcher_thread = std::thread::Builder::new()
        .name("thermal-switch".to_string())
        .spawn(move || watcher.run(switch, &SHUTDOWN))
        .context("spawning control file watcher")?;

    println!("SIMPLE-THERMAL IS ACTIVE (CTRL+C TO EXIT)");

    let res = driver.run(&SHUTDOWN);

    println!("SIMPLE-THERMAL IS SHUTTING DOWN");

    if watcher_thread.join().is_err() {
        warn!("control file watcher panicked");
    }

    if args.dump_log {
        driver.log.dump();
    }
    driver.log.summary();
    info!(
        "ticks={} skipped={} transitions={} refreshes={}",
        driver.shared().ticks.load(Ordering::Relaxed),
        driver.shared().skipped_ticks.load(Ordering::Relaxed),
        driver.shared().transitions.load(Ordering::Relaxed),
        driver.shared().refresh_requests.load(Ordering::Relaxed),
    );

    // DROPPING THE DRIVER UNREGISTERS THE CLAMP AND RESTORES EVERY LIMIT
    drop(driver);

    println!("SIMPLE-THERMAL OUT.");
    res.map_err(Into::into)
}
