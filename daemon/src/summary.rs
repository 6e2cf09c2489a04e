//! Rollup statistics over the retained history

use crate::collector::Pid;
use crate::detector::LeakState;
use crate::history::HistoryStore;
use crate::registry::ProcessRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub mean: f64,
    pub max: f64,
}

impl SeriesStats {
    /// `None` for an empty series.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let (count, sum, max) = values
            .into_iter()
            .fold((0usize, 0.0, f64::NEG_INFINITY), |(count, sum, max), v| {
                (count + 1, sum + v, max.max(v))
            });
        (count > 0).then(|| SeriesStats {
            mean: sum / count as f64,
            max,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub uptime_seconds: f64,
    pub samples: usize,
    pub host_used: SeriesStats,
    pub self_process: SeriesStats,
    /// Tracked PIDs with at least one sample.
    pub processes: BTreeMap<Pid, SeriesStats>,
    pub leak_detected: bool,
}

/// Compute the rollup; `None` until the first tick has been recorded.
pub fn summarize(
    store: &HistoryStore,
    registry: &ProcessRegistry,
    leak: LeakState,
    uptime: Duration,
) -> Option<Summary> {
    let host_used = SeriesStats::from_values(store.host().iter().map(|s| s.used_mb))?;
    let self_process = SeriesStats::from_values(store.self_series().iter().copied())?;

    let processes = registry
        .iter()
        .filter_map(|process| {
            let stats =
                SeriesStats::from_values(process.history().iter().map(|s| s.resident_mb))?;
            Some((process.pid(), stats))
        })
        .collect();

    Some(Summary {
        uptime_seconds: uptime.as_secs_f64(),
        samples: store.len(),
        host_used,
        self_process,
        processes,
        leak_detected: leak.is_leak_active,
    })
}
