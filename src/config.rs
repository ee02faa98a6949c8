use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationErrors;
use crate::screen::BrightnessScale;

/// Wall-clock time of day with minute resolution.
///
/// Seconds and sub-seconds are dropped on construction so that two values
/// naming the same minute always compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(&self) -> u32 {
        u32::from(self.hour)
    }

    pub fn minute(&self) -> u32 {
        u32::from(self.minute)
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

impl From<NaiveDateTime> for TimeOfDay {
    fn from(value: NaiveDateTime) -> Self {
        value.time().into()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeOfDayError(String);

impl fmt::Display for ParseTimeOfDayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day '{}': expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseTimeOfDayError {}

impl FromStr for TimeOfDay {
    type Err = ParseTimeOfDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
            .map(TimeOfDay::from)
            .map_err(|_| ParseTimeOfDayError(s.to_string()))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayKind {
    #[default]
    Backlight,
    Headless,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DisplayConfig {
    pub kind: DisplayKind,
    pub backlight_directory: PathBuf,
    pub brightness_scale: BrightnessScale,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            kind: DisplayKind::Backlight,
            backlight_directory: PathBuf::from("/sys/class/backlight/rpi_backlight"),
            brightness_scale: BrightnessScale::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerKind {
    #[default]
    Pqiv,
    Headless,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ViewerConfig {
    pub kind: ViewerKind,
    pub executable: PathBuf,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            kind: ViewerKind::Pqiv,
            executable: PathBuf::from(crate::render::pqiv::DEFAULT_PQIV_PATH),
        }
    }
}

/// Everything the frame needs to know to run unattended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Root directory that is scanned recursively for pictures.
    pub photo_directory: PathBuf,
    /// How long each picture stays on screen.
    #[serde(with = "humantime_serde")]
    pub photo_change_interval: Duration,
    /// How often the picture list is rebuilt from disk. Zero disables rescans.
    #[serde(with = "humantime_serde")]
    pub photo_refresh_interval: Duration,
    pub http_port: u16,
    /// Backlight brightness as a percentage.
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awake_time: Option<TimeOfDay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_time: Option<TimeOfDay>,
    pub reboot_command: String,
    pub shutdown_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_to_desktop_command: Option<String>,
    /// Delay between a quit request and its consequence.
    #[serde(with = "humantime_serde")]
    pub quit_grace_period: Duration,
    /// Directory holding the `css/` and `js/` assets served by the control pages.
    pub asset_directory: PathBuf,
    pub display: DisplayConfig,
    pub viewer: ViewerConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            photo_directory: PathBuf::from("/home/picframe/Photos"),
            photo_change_interval: Duration::from_secs(60),
            photo_refresh_interval: Duration::from_secs(60 * 60),
            http_port: 80,
            brightness: 75,
            awake_time: None,
            sleep_time: None,
            reboot_command: "sudo reboot".to_string(),
            shutdown_command: "sudo poweroff".to_string(),
            exit_to_desktop_command: None,
            quit_grace_period: Duration::from_secs(5),
            asset_directory: PathBuf::from("html"),
            display: DisplayConfig::default(),
            viewer: ViewerConfig::default(),
        }
    }
}

impl Configuration {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Checks every field and reports all failures at once.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if is_blank_path(&self.photo_directory) {
            errors.push("photo-directory", "must not be empty or whitespace");
        }
        if self.photo_change_interval.is_zero() {
            errors.push("photo-change-interval", "must be greater than zero");
        }
        if self.brightness > 100 {
            errors.push(
                "brightness",
                format!("must be between 0 and 100 (got {})", self.brightness),
            );
        }
        if self.reboot_command.trim().is_empty() {
            errors.push("reboot-command", "must not be blank");
        }
        if self.shutdown_command.trim().is_empty() {
            errors.push("shutdown-command", "must not be blank");
        }
        if matches!(&self.exit_to_desktop_command, Some(cmd) if cmd.trim().is_empty()) {
            errors.push("exit-to-desktop-command", "must not be blank when set");
        }
        if self.display.kind == DisplayKind::Backlight && is_blank_path(&self.display.backlight_directory)
        {
            errors.push("display.backlight-directory", "must not be empty");
        }
        if self.viewer.kind == ViewerKind::Pqiv && is_blank_path(&self.viewer.executable) {
            errors.push("viewer.executable", "must not be empty");
        }

        errors.into_result()
    }

    pub fn validated(self) -> Result<Self, ValidationErrors> {
        self.validate()?;
        Ok(self)
    }
}

fn is_blank_path(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}
