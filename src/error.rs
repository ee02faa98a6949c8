use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single rejected configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every problem found while validating a configuration, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.errors.iter().any(|err| err.field == field)
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, err) in self.errors.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", err.field, err.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid configuration:\n{0}")]
    InvalidConfig(#[from] ValidationErrors),
    #[error("failed to access configuration at {path}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration at {path}")]
    ConfigFormat {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("picture frame has been disposed")]
    Disposed,
    #[error("picture frame is already running")]
    AlreadyRunning,
    #[error("invalid schedule: {0}")]
    Schedule(&'static str),
    #[error("failed to start control server on port {port}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("{0:#}")]
    Collaborator(anyhow::Error),
    #[error("background task failed")]
    Task(#[from] tokio::task::JoinError),
    #[error("dispose finished with {} failure(s): {}", .0.len(), .0.join("; "))]
    Dispose(Vec<String>),
}

pub type Result<T, E = FrameError> = std::result::Result<T, E>;
