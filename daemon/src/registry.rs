//! Tracked-process registry
//!
//! Owns the set of user-selected PIDs and one capped history buffer per PID.
//! A PID whose memory can no longer be read is evicted during sampling.

use crate::collector::{Pid, SnapshotSource};
use crate::error::{QueryError, RegistryError};
use crate::history::HistoryBuffer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessSample {
    pub pid: Pid,
    pub resident_mb: f64,
}

#[derive(Debug, Clone)]
pub struct TrackedProcess {
    pid: Pid,
    tracked_since: DateTime<Utc>,
    history: HistoryBuffer<ProcessSample>,
}

impl TrackedProcess {
    fn new(pid: Pid, capacity: usize) -> Self {
        Self {
            pid,
            tracked_since: Utc::now(),
            history: HistoryBuffer::new(capacity),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn tracked_since(&self) -> DateTime<Utc> {
        self.tracked_since
    }

    pub fn history(&self) -> &HistoryBuffer<ProcessSample> {
        &self.history
    }
}

/// Result of a successful `track`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tracked {
    Added,
    /// Already present; existing history kept.
    AlreadyTracked,
}

#[derive(Debug)]
pub struct LostProcess {
    pub pid: Pid,
    pub error: QueryError,
}

#[derive(Debug, Default)]
pub struct SampleOutcome {
    /// Readings for every PID that was sampled successfully.
    pub values: BTreeMap<Pid, f64>,
    /// PIDs evicted during this pass.
    pub lost: Vec<LostProcess>,
}

#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    capacity: usize,
    processes: BTreeMap<Pid, TrackedProcess>,
}

impl ProcessRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            processes: BTreeMap::new(),
        }
    }

    pub fn track(&mut self, source: &dyn SnapshotSource, pid: Pid) -> Result<Tracked, RegistryError> {
        if self.processes.contains_key(&pid) {
            debug!("PID {} already tracked", pid);
            return Ok(Tracked::AlreadyTracked);
        }
        if !source.process_exists(pid) {
            return Err(RegistryError::NotFound(pid));
        }
        self.processes
            .insert(pid, TrackedProcess::new(pid, self.capacity));
        info!("Tracking process {}", pid);
        Ok(Tracked::Added)
    }

    pub fn untrack(&mut self, pid: Pid) -> Result<(), RegistryError> {
        match self.processes.remove(&pid) {
            Some(_) => {
                info!("Stopped tracking process {}", pid);
                Ok(())
            }
            None => Err(RegistryError::NotTracked(pid)),
        }
    }

    /// Read every tracked PID once. Failed reads evict the PID and its
    /// buffer; they are reported in `lost`, never returned as errors.
    pub fn sample_all(&mut self, source: &dyn SnapshotSource) -> SampleOutcome {
        let mut outcome = SampleOutcome::default();

        self.processes.retain(|&pid, process| match source.process_memory(pid) {
            Ok(resident_mb) => {
                process.history.push(ProcessSample { pid, resident_mb });
                outcome.values.insert(pid, resident_mb);
                true
            }
            Err(error) => {
                warn!("Process {} lost, untracking: {}", pid, error);
                outcome.lost.push(LostProcess { pid, error });
                false
            }
        });

        outcome
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&TrackedProcess> {
        self.processes.get(&pid)
    }

    /// Tracked PIDs in ascending order.
    pub fn pids(&self) -> Vec<Pid> {
        self.processes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedProcess> {
        self.processes.values()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
