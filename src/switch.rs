// SIMPLE-THERMAL CONTROL FILE
// THE ADMINISTRATIVE "MITIGATION ENABLED" SWITCH, EXPOSED AS ONE FILE.
// READ IT FOR THE CURRENT STATE, WRITE A BOOLEAN TO TOGGLE.
//
// A WATCHER THREAD POLLS THE FILE AND FORWARDS EVERY WRITE TO THE CONTROL
// LOOP THROUGH MitigationSwitch. IT NEVER TOUCHES LOOP STATE DIRECTLY.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::control::MitigationSwitch;

pub const DEFAULT_CONTROL_PATH: &str = "/run/simple-thermal/enabled";

const WATCH_INTERVAL: Duration = Duration::from_millis(250);

// KERNEL kstrtobool SEMANTICS: FIRST CHARACTER DECIDES, "on"/"off" SPECIAL-CASED
pub fn parse_bool(raw: &str) -> Option<bool> {
    let s = raw.trim();
    let mut chars = s.chars();
    match chars.next()? {
        'y' | 'Y' | '1' => Some(true),
        'n' | 'N' | '0' => Some(false),
        'o' | 'O' => match chars.next()? {
            'n' | 'N' => Some(true),
            'f' | 'F' => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn write_switch(path: &Path, on: bool) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::write(path, if on { "1\n" } else { "0\n" })
        .with_context(|| format!("writing {}", path.display()))
}

pub fn read_switch(path: &Path) -> Result<bool> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_bool(&raw).with_context(|| format!("{}: not a boolean: {:?}", path.display(), raw.trim()))
}

pub struct SwitchWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    last_raw: String,
}

impl SwitchWatcher {
    // PUBLISHES THE INITIAL STATE, THEN REMEMBERS ITS OWN WRITE
    pub fn create(path: &Path, initial: bool) -> Result<Self> {
        write_switch(path, initial)?;
        let last_modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        let last_raw = fs::read_to_string(path).unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            last_modified,
            last_raw,
        })
    }

    // ONE POLL. Some(value) WHEN THE FILE WAS WRITTEN SINCE THE LAST POLL.
    // CONTENT IS COMPARED TOO: COARSE MTIMES CAN HIDE A QUICK REWRITE.
    pub fn poll(&mut self) -> Option<bool> {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        let raw = fs::read_to_string(&self.path).ok()?;
        if Some(modified) == self.last_modified && raw == self.last_raw {
            return None;
        }
        self.last_modified = Some(modified);
        self.last_raw.clone_from(&raw);

        match parse_bool(&raw) {
            Some(v) => Some(v),
            None => {
                warn!("{}: ignoring {:?}", self.path.display(), raw.trim());
                None
            }
        }
    }

    pub fn run(mut self, switch: MitigationSwitch, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(WATCH_INTERVAL);
            if let Some(on) = self.poll() {
                info!("control file: mitigation {}", if on { "enabled" } else { "disabled" });
                switch.set_enabled(on);
            }
        }
        let _ = fs::remove_file(&self.path);
    }
}
