//! Tabular history rows for exporters (CSV writers, history log views)

use crate::collector::Pid;
use crate::history::HistoryStore;
use crate::registry::ProcessRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const BASE_COLUMNS: [&str; 7] = [
    "timestamp",
    "total_memory",
    "used_memory",
    "free_memory",
    "used_swap",
    "memory_percent",
    "process_memory",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub total_mb: f64,
    pub used_mb: f64,
    pub free_mb: f64,
    pub swap_used_mb: f64,
    pub used_percent: f64,
    pub self_mb: f64,
    /// One entry per tracked PID, in column order. `None` for ticks
    /// recorded before the PID was tracked.
    pub processes: Vec<Option<f64>>,
}

impl HistoryRow {
    /// Render as string cells; missing values become empty cells.
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.timestamp.to_rfc3339(),
            self.total_mb.to_string(),
            self.used_mb.to_string(),
            self.free_mb.to_string(),
            self.swap_used_mb.to_string(),
            self.used_percent.to_string(),
            self.self_mb.to_string(),
        ];
        cells.extend(
            self.processes
                .iter()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
        );
        cells
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryTable {
    pub columns: Vec<String>,
    pub pids: Vec<Pid>,
    pub rows: Vec<HistoryRow>,
}

impl HistoryTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep only the newest `limit` rows.
    pub fn tail(mut self, limit: usize) -> Self {
        let skip = self.rows.len().saturating_sub(limit);
        self.rows.drain(..skip);
        self
    }
}

pub fn column_name(pid: Pid) -> String {
    format!("process_{pid}_memory")
}

/// Build one row per retained tick, oldest first.
///
/// A tracked PID is sampled on every tick from the moment it is tracked, so
/// its buffer lines up with the newest entries of the timeline.
pub fn export_history(store: &HistoryStore, registry: &ProcessRegistry) -> HistoryTable {
    let pids = registry.pids();
    let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.extend(pids.iter().map(|&pid| column_name(pid)));

    let len = store.len();
    let process_series: Vec<Vec<Option<f64>>> = registry
        .iter()
        .map(|process| {
            let history = process.history();
            let offset = len.saturating_sub(history.len());
            let mut series = vec![None; offset];
            series.extend(history.tail(len).map(|s| Some(s.resident_mb)));
            series
        })
        .collect();

    let rows = store
        .host()
        .iter()
        .zip(store.self_series().iter())
        .enumerate()
        .map(|(i, (host, &self_mb))| HistoryRow {
            timestamp: host.timestamp,
            total_mb: host.total_mb,
            used_mb: host.used_mb,
            free_mb: host.free_mb,
            swap_used_mb: host.swap_used_mb,
            used_percent: host.used_percent,
            self_mb,
            processes: process_series
                .iter()
                .map(|series| series.get(i).copied().flatten())
                .collect(),
        })
        .collect();

    HistoryTable {
        columns,
        pids,
        rows,
    }
}
