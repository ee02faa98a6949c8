use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use crate::platform::display_power::BacklightScreen;

/// Display whose backlight and power state the frame controls.
///
/// Implementations are shared across tasks and must tolerate concurrent calls.
pub trait Screen: Send + Sync {
    /// Brightness as a percentage in `0..=100`.
    fn brightness(&self) -> u8;
    fn set_brightness(&self, percent: u8) -> Result<()>;
    fn is_on(&self) -> bool;
    fn set_on(&self, on: bool) -> Result<()>;
    /// Re-reads the cached state from the device.
    fn refresh(&self);

    /// Flips the power state and returns the new one.
    fn toggle(&self) -> Result<bool> {
        let next = !self.is_on();
        self.set_on(next)?;
        Ok(next)
    }
}

/// Mapping between a brightness percentage and the raw `0..=255` device value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrightnessScale {
    /// `raw = floor(percent * 255 / 100)`.
    #[default]
    Linear,
    /// Panels that go dark below raw 20: `raw = floor(percent * 235 / 100 + 20)`.
    Offset,
}

const RAW_MAX: u32 = 255;
const OFFSET_FLOOR: u32 = 20;

impl BrightnessScale {
    pub fn to_raw(self, percent: u8) -> u32 {
        let percent = u32::from(percent.min(100));
        match self {
            BrightnessScale::Linear => percent * RAW_MAX / 100,
            BrightnessScale::Offset => percent * (RAW_MAX - OFFSET_FLOOR) / 100 + OFFSET_FLOOR,
        }
    }

    pub fn from_raw(self, raw: u32) -> u8 {
        let raw = raw.min(RAW_MAX);
        let percent = match self {
            BrightnessScale::Linear => (raw * 100).div_ceil(RAW_MAX),
            BrightnessScale::Offset => {
                (raw.saturating_sub(OFFSET_FLOOR) * 100).div_ceil(RAW_MAX - OFFSET_FLOOR)
            }
        };
        percent.min(100) as u8
    }
}

/// In-memory screen for machines without a controllable backlight.
#[derive(Debug)]
pub struct HeadlessScreen {
    brightness: AtomicU8,
    on: AtomicBool,
}

impl Default for HeadlessScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessScreen {
    pub fn new() -> Self {
        Self {
            brightness: AtomicU8::new(100),
            on: AtomicBool::new(true),
        }
    }
}

impl Screen for HeadlessScreen {
    fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::SeqCst)
    }

    fn set_brightness(&self, percent: u8) -> Result<()> {
        ensure!(percent <= 100, "brightness must be between 0 and 100 (got {percent})");
        self.brightness.store(percent, Ordering::SeqCst);
        debug!(percent, "headless brightness set");
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn set_on(&self, on: bool) -> Result<()> {
        self.on.store(on, Ordering::SeqCst);
        debug!(on, "headless screen power set");
        Ok(())
    }

    fn refresh(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_scale_matches_reference_points() {
        let scale = BrightnessScale::Linear;
        assert_eq!(scale.to_raw(0), 0);
        assert_eq!(scale.to_raw(50), 127);
        assert_eq!(scale.to_raw(100), 255);
        assert_eq!(scale.from_raw(0), 0);
        assert_eq!(scale.from_raw(127), 50);
        assert_eq!(scale.from_raw(255), 100);
    }

    #[test]
    fn offset_scale_keeps_the_panel_lit() {
        let scale = BrightnessScale::Offset;
        assert_eq!(scale.to_raw(0), 20);
        assert_eq!(scale.to_raw(100), 255);
        assert_eq!(scale.from_raw(10), 0);
        assert_eq!(scale.from_raw(255), 100);
    }

    #[test]
    fn every_percentage_survives_the_device_round_trip() {
        for scale in [BrightnessScale::Linear, BrightnessScale::Offset] {
            for percent in 0..=100u8 {
                assert_eq!(scale.from_raw(scale.to_raw(percent)), percent, "{scale:?}");
            }
        }
    }

    #[test]
    fn headless_toggle_flips_power() {
        let screen = HeadlessScreen::new();
        assert!(screen.is_on());
        assert!(!screen.toggle().unwrap());
        assert!(screen.toggle().unwrap());
    }

    #[test]
    fn headless_rejects_out_of_range_brightness() {
        let screen = HeadlessScreen::new();
        assert!(screen.set_brightness(101).is_err());
        screen.set_brightness(30).unwrap();
        assert_eq!(screen.brightness(), 30);
    }
}
