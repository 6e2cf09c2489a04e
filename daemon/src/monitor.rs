//! Owned monitor state and the per-tick sampling pipeline

use crate::collector::{Pid, SnapshotSource};
use crate::config::Config;
use crate::detector::{Evaluation, LeakAlertEvent, LeakDetector, LeakState};
use crate::error::{InvalidThreshold, QueryError, RegistryError};
use crate::events::{MonitorEvent, SnapshotEvent};
use crate::export::{export_history, HistoryTable};
use crate::history::HistoryStore;
use crate::registry::{ProcessRegistry, Tracked};
use crate::summary::{summarize, Summary};
use std::time::{Duration, Instant};
use tracing::debug;

/// What a completed tick produced, in publication order.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub lost: Vec<(Pid, String)>,
    pub alert: Option<LeakAlertEvent>,
    pub snapshot: SnapshotEvent,
}

impl TickReport {
    pub fn into_events(self) -> Vec<MonitorEvent> {
        let mut events: Vec<MonitorEvent> = self
            .lost
            .into_iter()
            .map(|(pid, reason)| MonitorEvent::ProcessLost { pid, reason })
            .collect();
        if let Some(alert) = self.alert {
            events.push(MonitorEvent::LeakAlert(alert));
        }
        events.push(MonitorEvent::Snapshot(self.snapshot));
        events
    }
}

/// All mutable monitoring state. Only the scheduler's tick and the control
/// surface (behind the same lock) touch it.
#[derive(Debug, Clone)]
pub struct MonitorState {
    store: HistoryStore,
    registry: ProcessRegistry,
    detector: LeakDetector,
    started_at: Option<Instant>,
    ticks: u64,
}

impl MonitorState {
    pub fn new(config: &Config) -> Self {
        let capacity = config.general.history_capacity;
        Self {
            store: HistoryStore::new(capacity),
            registry: ProcessRegistry::new(capacity),
            detector: LeakDetector::new(
                config.leak.threshold_mb_per_min,
                config.leak.window_samples,
                config.sample_interval(),
            ),
            started_at: None,
            ticks: 0,
        }
    }

    /// Run one pipeline pass: query host and self, sample tracked
    /// processes, commit to history, evaluate the leak trend.
    ///
    /// A host or self query error aborts before anything is written.
    pub fn tick(&mut self, source: &dyn SnapshotSource) -> Result<TickReport, QueryError> {
        let host = source.host_memory()?;
        let self_mb = source.self_process_memory()?;

        self.started_at.get_or_insert_with(Instant::now);
        let sampled = self.registry.sample_all(source);
        self.store
            .begin_tick()
            .record_host(host)
            .record_self(self_mb)
            .commit();
        self.ticks += 1;

        let alert = match self
            .detector
            .evaluate(self.store.self_series().iter(), host.timestamp)
        {
            Evaluation::Raised(alert) => Some(alert),
            Evaluation::InsufficientHistory { have, need } => {
                debug!("Leak check skipped: {}/{} samples", have, need);
                None
            }
            Evaluation::Unchanged { .. } | Evaluation::Cleared { .. } => None,
        };

        Ok(TickReport {
            lost: sampled
                .lost
                .into_iter()
                .map(|lost| (lost.pid, lost.error.to_string()))
                .collect(),
            alert,
            snapshot: SnapshotEvent {
                tick: self.ticks,
                timestamp: host.timestamp,
                host,
                self_mb,
                processes: sampled.values,
                leak: self.detector.state(),
            },
        })
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn track(&mut self, source: &dyn SnapshotSource, pid: Pid) -> Result<Tracked, RegistryError> {
        self.registry.track(source, pid)
    }

    pub fn untrack(&mut self, pid: Pid) -> Result<(), RegistryError> {
        self.registry.untrack(pid)
    }

    pub fn set_threshold(&mut self, mb_per_min: f64) -> Result<(), InvalidThreshold> {
        self.detector.set_threshold(mb_per_min)
    }

    pub fn summary(&self) -> Option<Summary> {
        summarize(
            &self.store,
            &self.registry,
            self.detector.state(),
            self.uptime(),
        )
    }

    pub fn export_history(&self) -> HistoryTable {
        export_history(&self.store, &self.registry)
    }

    pub fn leak_state(&self) -> LeakState {
        self.detector.state()
    }

    pub fn threshold(&self) -> f64 {
        self.detector.threshold()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }
}
