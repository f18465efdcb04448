use std::path::Path;

use anyhow::{Context, Result};

use simple_thermal::switch::{read_switch, write_switch};

pub fn run_set(control: &Path, on: bool) -> Result<()> {
    // ONLY A RUNNING DAEMON CREATES THE FILE. WRITING A FRESH ONE WOULD BE IGNORED.
    if !control.exists() {
        eprintln!("simple-thermal not running (no control file at {})", control.display());
        std::process::exit(1);
    }
    write_switch(control, on).context("toggling thermal mitigation")?;
    println!("thermal mitigation {}", if on { "enabled" } else { "disabled" });
    Ok(())
}

pub fn run_status(control: &Path) -> Result<()> {
    if !control.exists() {
        eprintln!("simple-thermal not running (no control file at {})", control.display());
        std::process::exit(1);
    }
    let on = read_switch(control)?;
    println!("{}", if on { "enabled" } else { "disabled" });
    Ok(())
}
