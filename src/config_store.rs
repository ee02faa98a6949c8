use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Configuration;
use crate::error::{FrameError, Result};

const APP_DIR: &str = "picture-frame";
const FILE_NAME: &str = "config.yaml";
const FALLBACK_FILE: &str = "picture-frame.yaml";

/// Persists the live configuration as a YAML file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_CONFIG_HOME/picture-frame/config.yaml`, then `~/.config/...`,
    /// then `./picture-frame.yaml` when neither variable is set.
    pub fn default_path() -> PathBuf {
        if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            return PathBuf::from(dir).join(APP_DIR).join(FILE_NAME);
        }
        if let Some(home) = env::var_os("HOME").filter(|v| !v.is_empty()) {
            return PathBuf::from(home)
                .join(".config")
                .join(APP_DIR)
                .join(FILE_NAME);
        }
        PathBuf::from(FALLBACK_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the stored configuration. A missing file yields `None`.
    pub fn load(&self) -> Result<Option<Configuration>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(FrameError::ConfigIo {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let config =
            Configuration::from_yaml_str(&contents).map_err(|source| FrameError::ConfigFormat {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(config.validated()?))
    }

    /// Loads the stored configuration, writing defaults first if none exists yet.
    pub fn load_or_create(&self) -> Result<Configuration> {
        if let Some(config) = self.load()? {
            debug!(path = %self.path.display(), "loaded configuration");
            return Ok(config);
        }
        let config = Configuration::default();
        self.save(&config)?;
        info!(path = %self.path.display(), "wrote default configuration");
        Ok(config)
    }

    /// Writes through a sibling temp file and renames it into place.
    pub fn save(&self, config: &Configuration) -> Result<()> {
        let yaml = config.to_yaml().map_err(|source| FrameError::ConfigFormat {
            path: self.path.clone(),
            source,
        })?;
        let io_err = |source: std::io::Error| FrameError::ConfigIo {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        fs::write(&tmp, yaml).map_err(io_err)?;
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(err));
        }
        debug!(path = %self.path.display(), "saved configuration");
        Ok(())
    }
}
