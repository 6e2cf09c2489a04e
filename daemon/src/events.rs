//! Event hand-off from the sampling task to consumers
//!
//! Events fan out over a bounded broadcast channel: a slow receiver loses
//! its oldest events (`RecvError::Lagged`) and never stalls the sampler.
//! The newest snapshot is also kept in a watch slot for latest-wins reads.

use crate::collector::{HostMemorySample, Pid};
use crate::detector::{LeakAlertEvent, LeakState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, watch};

/// Everything one completed tick observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEvent {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub host: HostMemorySample,
    pub self_mb: f64,
    pub processes: BTreeMap<Pid, f64>,
    pub leak: LeakState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    Snapshot(SnapshotEvent),
    LeakAlert(LeakAlertEvent),
    ProcessLost { pid: Pid, reason: String },
}

pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
    latest: watch::Sender<Option<SnapshotEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (latest, _) = watch::channel(None);
        Self { tx, latest }
    }

    /// Non-blocking; events published with no subscribers are dropped.
    pub fn publish(&self, event: MonitorEvent) {
        if let MonitorEvent::Snapshot(snapshot) = &event {
            self.latest.send_replace(Some(snapshot.clone()));
        }
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<SnapshotEvent> {
        self.latest.borrow().clone()
    }

    pub fn watch_latest(&self) -> watch::Receiver<Option<SnapshotEvent>> {
        self.latest.subscribe()
    }
}
