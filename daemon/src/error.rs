//! Error types shared by the sampling core and the daemon

use crate::collector::Pid;
use thiserror::Error;

/// A host or process memory read that failed.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no process with PID {0}")]
    NoSuchProcess(Pid),

    #[error("access denied reading PID {0}")]
    AccessDenied(Pid),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("{0}")]
    Unavailable(String),
}

impl QueryError {
    /// Map an I/O failure on a `/proc/<pid>` path to the matching variant.
    pub fn from_proc_io(pid: Pid, path: String, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => QueryError::NoSuchProcess(pid),
            std::io::ErrorKind::PermissionDenied => QueryError::AccessDenied(pid),
            _ => QueryError::Io { path, source },
        }
    }
}

/// Errors returned synchronously by `track` / `untrack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no process found with PID {0}")]
    NotFound(Pid),

    #[error("process {0} is not being tracked")]
    NotTracked(Pid),
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("leak threshold must be a positive finite MB/min value, got {0}")]
pub struct InvalidThreshold(pub f64);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
