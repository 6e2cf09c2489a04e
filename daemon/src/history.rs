//! Bounded, time-aligned sample history

use crate::collector::HostMemorySample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Append-only ring buffer: once full, each push evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted entry if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> {
        self.items.iter().skip(self.items.len().saturating_sub(n))
    }
}

impl<T: Clone> HistoryBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Owned copy of the store's series, safe to hand to other threads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryView {
    pub timestamps: Vec<DateTime<Utc>>,
    pub host: Vec<HostMemorySample>,
    pub self_mb: Vec<f64>,
}

impl HistoryView {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Tick timestamps, host samples and self-process readings. The three series
/// only grow together, through [`PendingTick::commit`].
#[derive(Debug, Clone)]
pub struct HistoryStore {
    timestamps: HistoryBuffer<DateTime<Utc>>,
    host: HistoryBuffer<HostMemorySample>,
    self_mb: HistoryBuffer<f64>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            timestamps: HistoryBuffer::new(capacity),
            host: HistoryBuffer::new(capacity),
            self_mb: HistoryBuffer::new(capacity),
        }
    }

    pub fn begin_tick(&mut self) -> PendingTick<'_> {
        PendingTick {
            store: self,
            host: None,
            self_mb: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.timestamps.capacity()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &HistoryBuffer<DateTime<Utc>> {
        &self.timestamps
    }

    pub fn host(&self) -> &HistoryBuffer<HostMemorySample> {
        &self.host
    }

    pub fn self_series(&self) -> &HistoryBuffer<f64> {
        &self.self_mb
    }

    pub fn snapshot_view(&self) -> HistoryView {
        HistoryView {
            timestamps: self.timestamps.to_vec(),
            host: self.host.to_vec(),
            self_mb: self.self_mb.to_vec(),
        }
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One tick's worth of writes, staged until every series has a value.
/// Dropping it without committing leaves the store untouched.
#[must_use = "a pending tick records nothing until committed"]
pub struct PendingTick<'a> {
    store: &'a mut HistoryStore,
    host: Option<HostMemorySample>,
    self_mb: Option<f64>,
}

impl PendingTick<'_> {
    pub fn record_host(mut self, sample: HostMemorySample) -> Self {
        self.host = Some(sample);
        self
    }

    pub fn record_self(mut self, value: f64) -> Self {
        self.self_mb = Some(value);
        self
    }

    /// Append timestamp, host sample and self reading together. Returns
    /// `false` and records nothing if either value is missing.
    pub fn commit(self) -> bool {
        let (Some(host), Some(self_mb)) = (self.host, self.self_mb) else {
            return false;
        };
        self.store.timestamps.push(host.timestamp);
        self.store.host.push(host);
        self.store.self_mb.push(self_mb);
        true
    }
}
