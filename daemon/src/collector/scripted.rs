use super::{HostMemorySample, Pid, ProcessDetails, SnapshotSource, SystemInfo};
use crate::error::QueryError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_TOTAL_MB: f64 = 16384.0;
const DEFAULT_HOST_USED_MB: f64 = 4096.0;
const DEFAULT_SELF_MB: f64 = 50.0;
/// 2023-11-14T22:13:20Z, keeps scripted timestamps stable across runs
const SCRIPT_EPOCH_SECS: i64 = 1_700_000_000;

/// A queue of readings; `None` is a failed read. Once drained, the last
/// successful value repeats.
#[derive(Debug, Default)]
struct Series {
    pending: VecDeque<Option<f64>>,
    last: Option<f64>,
}

impl Series {
    fn constant(value: f64) -> Self {
        Self {
            pending: VecDeque::new(),
            last: Some(value),
        }
    }

    fn from_readings(readings: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self {
            pending: readings.into_iter().collect(),
            last: None,
        }
    }

    fn next(&mut self) -> Option<f64> {
        match self.pending.pop_front() {
            Some(Some(value)) => {
                self.last = Some(value);
                Some(value)
            }
            Some(None) => None,
            None => self.last,
        }
    }

    fn peek(&self) -> Option<f64> {
        match self.pending.front() {
            Some(reading) => *reading,
            None => self.last,
        }
    }
}

#[derive(Debug)]
struct ScriptedProcess {
    series: Series,
    alive: bool,
}

#[derive(Debug)]
struct Script {
    host_queries: u64,
    total_mb: f64,
    host_used: Series,
    self_mb: Series,
    processes: HashMap<Pid, ScriptedProcess>,
}

/// Deterministic [`SnapshotSource`] that replays scripted readings.
///
/// Each `host_memory` call advances the scripted clock by one second, so a
/// tick's timestamp is `epoch + n seconds`.
#[derive(Debug)]
pub struct ScriptedSource {
    script: Mutex<Script>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                host_queries: 0,
                total_mb: DEFAULT_TOTAL_MB,
                host_used: Series::constant(DEFAULT_HOST_USED_MB),
                self_mb: Series::constant(DEFAULT_SELF_MB),
                processes: HashMap::new(),
            }),
        }
    }

    pub fn with_total_mb(self, total_mb: f64) -> Self {
        self.lock().total_mb = total_mb;
        self
    }

    pub fn with_host_used(self, values: impl IntoIterator<Item = f64>) -> Self {
        self.lock().host_used = Series::from_readings(values.into_iter().map(Some));
        self
    }

    pub fn with_self_series(self, values: impl IntoIterator<Item = f64>) -> Self {
        self.with_self_readings(values.into_iter().map(Some))
    }

    /// `None` entries make `self_process_memory` fail on that call.
    pub fn with_self_readings(self, readings: impl IntoIterator<Item = Option<f64>>) -> Self {
        self.lock().self_mb = Series::from_readings(readings);
        self
    }

    pub fn with_process(self, pid: Pid, values: impl IntoIterator<Item = f64>) -> Self {
        self.with_process_readings(pid, values.into_iter().map(Some))
    }

    /// `None` entries make `process_memory(pid)` fail on that call.
    pub fn with_process_readings(
        self,
        pid: Pid,
        readings: impl IntoIterator<Item = Option<f64>>,
    ) -> Self {
        self.spawn(pid, readings);
        self
    }

    /// Make a process appear while the source is in use.
    pub fn spawn(&self, pid: Pid, readings: impl IntoIterator<Item = Option<f64>>) {
        self.lock().processes.insert(
            pid,
            ScriptedProcess {
                series: Series::from_readings(readings),
                alive: true,
            },
        );
    }

    /// Make a process disappear: it no longer exists and reads fail.
    pub fn kill(&self, pid: Pid) {
        if let Some(process) = self.lock().processes.get_mut(&pid) {
            process.alive = false;
        }
    }

    /// Number of host samples served so far.
    pub fn host_queries(&self) -> u64 {
        self.lock().host_queries
    }

    /// Timestamp the n-th host sample (0-based) carries.
    pub fn timestamp_for(n: u64) -> DateTime<Utc> {
        let epoch = Utc
            .timestamp_opt(SCRIPT_EPOCH_SECS, 0)
            .single()
            .unwrap_or_default();
        epoch + Duration::seconds(n as i64)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for ScriptedSource {
    fn host_memory(&self) -> Result<HostMemorySample, QueryError> {
        let mut script = self.lock();
        let n = script.host_queries;
        script.host_queries += 1;
        let total = script.total_mb;
        let used = script
            .host_used
            .next()
            .ok_or_else(|| QueryError::Unavailable("scripted host read failed".to_string()))?;

        Ok(HostMemorySample {
            timestamp: Self::timestamp_for(n),
            total_mb: total,
            used_mb: used,
            free_mb: (total - used).max(0.0),
            swap_used_mb: 0.0,
            used_percent: if total > 0.0 { used / total * 100.0 } else { 0.0 },
        })
    }

    fn self_process_memory(&self) -> Result<f64, QueryError> {
        self.lock()
            .self_mb
            .next()
            .ok_or_else(|| QueryError::Unavailable("scripted self read failed".to_string()))
    }

    fn process_memory(&self, pid: Pid) -> Result<f64, QueryError> {
        let mut script = self.lock();
        match script.processes.get_mut(&pid) {
            Some(process) if process.alive => process
                .series
                .next()
                .ok_or(QueryError::AccessDenied(pid)),
            _ => Err(QueryError::NoSuchProcess(pid)),
        }
    }

    fn process_exists(&self, pid: Pid) -> bool {
        self.lock()
            .processes
            .get(&pid)
            .is_some_and(|process| process.alive)
    }

    fn system_info(&self) -> SystemInfo {
        let total_mb = self.lock().total_mb;
        SystemInfo {
            system: "Scripted".to_string(),
            node: "localhost".to_string(),
            release: "0.0.0".to_string(),
            version: "scripted".to_string(),
            machine: std::env::consts::ARCH.to_string(),
            processor: "scripted".to_string(),
            physical_cores: 1,
            logical_cores: 1,
            total_memory_gb: total_mb / 1024.0,
            swap_memory_gb: 0.0,
        }
    }

    fn process_details(&self, pid: Pid) -> Result<ProcessDetails, QueryError> {
        let script = self.lock();
        let process = script
            .processes
            .get(&pid)
            .filter(|process| process.alive)
            .ok_or(QueryError::NoSuchProcess(pid))?;
        let memory_mb = process.series.peek().unwrap_or(0.0);
        Ok(ProcessDetails {
            pid,
            name: format!("scripted-{pid}"),
            state: 'S',
            threads: 1,
            cpu_percent: 0.0,
            memory_mb,
            memory_percent: memory_mb / script.total_mb * 100.0,
            started_at: Self::timestamp_for(0),
        })
    }
}
