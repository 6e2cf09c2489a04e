//! Memory snapshot sources (host and per-process counters)

mod linux;
mod scripted;

pub use linux::LinuxSnapshotSource;
pub use scripted::ScriptedSource;

use crate::error::QueryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Pid = u32;

pub(crate) const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Host-wide memory counters at one instant, in MB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostMemorySample {
    pub timestamp: DateTime<Utc>,
    pub total_mb: f64,
    pub used_mb: f64,
    pub free_mb: f64,
    pub swap_used_mb: f64,
    pub used_percent: f64,
}

/// Static host description, captured once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub system: String,
    pub node: String,
    pub release: String,
    pub version: String,
    pub machine: String,
    pub processor: String,
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub total_memory_gb: f64,
    pub swap_memory_gb: f64,
}

/// On-demand description of a single process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDetails {
    pub pid: Pid,
    pub name: String,
    pub state: char,
    pub threads: u64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub started_at: DateTime<Utc>,
}

/// Capability the monitor samples from. Implementations must be cheap and
/// bounded-time: every call runs inside a tick.
pub trait SnapshotSource: Send + Sync {
    fn host_memory(&self) -> Result<HostMemorySample, QueryError>;
    /// Resident memory of the monitoring process itself, in MB.
    fn self_process_memory(&self) -> Result<f64, QueryError>;
    /// Resident memory of `pid`, in MB.
    fn process_memory(&self, pid: Pid) -> Result<f64, QueryError>;
    fn process_exists(&self, pid: Pid) -> bool;
    fn system_info(&self) -> SystemInfo;
    fn process_details(&self, pid: Pid) -> Result<ProcessDetails, QueryError>;
}
