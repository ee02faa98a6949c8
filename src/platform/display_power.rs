use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, ensure};
use tracing::{debug, info, warn};

use crate::screen::{BrightnessScale, Screen};

const BRIGHTNESS_FILE: &str = "brightness";
const POWER_FILE: &str = "bl_power";
const POWER_ON: &str = "0";
const POWER_OFF: &str = "1";

/// Backlight driven through the kernel's sysfs interface
/// (`<dir>/brightness` and `<dir>/bl_power`).
///
/// Each file has its own lock, which also guards the cached value, so a
/// brightness write never waits on a power toggle.
pub struct BacklightScreen {
    brightness_path: PathBuf,
    power_path: PathBuf,
    scale: BrightnessScale,
    brightness: Mutex<u8>,
    on: Mutex<bool>,
}

impl fmt::Debug for BacklightScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacklightScreen")
            .field("brightness_path", &self.brightness_path)
            .field("power_path", &self.power_path)
            .field("scale", &self.scale)
            .finish()
    }
}

impl BacklightScreen {
    pub fn new(directory: impl AsRef<Path>, scale: BrightnessScale) -> Self {
        let directory = directory.as_ref();
        let screen = Self {
            brightness_path: directory.join(BRIGHTNESS_FILE),
            power_path: directory.join(POWER_FILE),
            scale,
            brightness: Mutex::new(100),
            on: Mutex::new(true),
        };
        screen.refresh();
        info!(
            directory = %directory.display(),
            brightness = screen.brightness(),
            on = screen.is_on(),
            "backlight screen ready"
        );
        screen
    }
}

impl Screen for BacklightScreen {
    fn brightness(&self) -> u8 {
        *lock(&self.brightness)
    }

    fn set_brightness(&self, percent: u8) -> Result<()> {
        ensure!(percent <= 100, "brightness must be between 0 and 100 (got {percent})");
        let mut cached = lock(&self.brightness);
        if *cached == percent {
            return Ok(());
        }
        let raw = self.scale.to_raw(percent);
        write_value(&self.brightness_path, &raw.to_string())?;
        *cached = percent;
        debug!(percent, raw, "backlight brightness set");
        Ok(())
    }

    fn is_on(&self) -> bool {
        *lock(&self.on)
    }

    fn set_on(&self, on: bool) -> Result<()> {
        let mut cached = lock(&self.on);
        if *cached == on {
            return Ok(());
        }
        write_value(&self.power_path, if on { POWER_ON } else { POWER_OFF })?;
        *cached = on;
        info!(on, "backlight power set");
        Ok(())
    }

    fn refresh(&self) {
        if let Some(value) = read_value(&self.power_path) {
            *lock(&self.on) = value.starts_with(POWER_ON);
        }
        if let Some(raw) = read_value(&self.brightness_path).and_then(|v| v.parse::<u32>().ok()) {
            if raw > 0 {
                *lock(&self.brightness) = self.scale.from_raw(raw);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_value(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(value) => Some(value.trim().to_string()),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read backlight value");
            None
        }
    }
}

// sysfs attributes already exist; never create a regular file in their place.
fn write_value(path: &Path, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(value.as_bytes())
        .with_context(|| format!("failed to write '{value}' to {}", path.display()))?;
    debug!(path = %path.display(), value, "wrote backlight value");
    Ok(())
}
