//! Sampling loop and the monitor's control surface

use crate::collector::{Pid, ProcessDetails, SnapshotSource, SystemInfo};
use crate::config::Config;
use crate::detector::LeakState;
use crate::error::{ConfigError, InvalidThreshold, QueryError, RegistryError};
use crate::events::{EventBus, MonitorEvent, SnapshotEvent};
use crate::export::HistoryTable;
use crate::monitor::{MonitorState, TickReport};
use crate::registry::Tracked;
use crate::summary::Summary;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

struct Shared {
    source: Arc<dyn SnapshotSource>,
    state: Mutex<MonitorState>,
    bus: EventBus,
}

impl Shared {
    /// Tick and publish under the state lock. Publishing never blocks, and
    /// holding the lock keeps events in tick order across concurrent ticks.
    async fn run_tick(&self) -> Result<TickReport, QueryError> {
        let mut state = self.state.lock().await;
        let report = state.tick(self.source.as_ref());
        match &report {
            Ok(report) => {
                for event in report.clone().into_events() {
                    self.bus.publish(event);
                }
            }
            Err(e) => warn!("Tick aborted: {}", e),
        }
        report
    }
}

struct Runner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Handle to a running (or stopped) memory monitor.
pub struct Monitor {
    shared: Arc<Shared>,
    interval: Duration,
    system_info: SystemInfo,
    runner: Mutex<Option<Runner>>,
}

impl Monitor {
    /// Fails if `config` does not pass [`Config::validate`].
    pub fn new(config: &Config, source: Arc<dyn SnapshotSource>) -> Result<Self, ConfigError> {
        config.validate()?;
        let system_info = source.system_info();
        Ok(Self {
            shared: Arc::new(Shared {
                source,
                state: Mutex::new(MonitorState::new(config)),
                bus: EventBus::new(config.general.event_buffer),
            }),
            interval: config.sample_interval(),
            system_info,
            runner: Mutex::new(None),
        })
    }

    /// Spawn the sampling loop. A no-op if it is already running.
    pub async fn start(&self) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            warn!("Monitor already running");
            return;
        }
        self.shared.state.lock().await.mark_started();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sampling_loop(
            Arc::clone(&self.shared),
            self.interval,
            shutdown_rx,
        ));
        *runner = Some(Runner { shutdown, handle });
        info!("Sampling every {:?}", self.interval);
    }

    /// Stop the loop and wait for it to exit. Idempotent; once this returns
    /// no further tick runs until `start` is called again.
    pub async fn stop(&self) {
        // Held across the join so a concurrent stop waits for the exit too
        let mut slot = self.runner.lock().await;
        let Some(runner) = slot.take() else {
            return;
        };
        let _ = runner.shutdown.send(true);
        if let Err(e) = runner.handle.await {
            error!("Sampling loop ended abnormally: {}", e);
        }
        info!("Sampling stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Run one tick right away, outside the periodic schedule.
    pub async fn tick_now(&self) -> Result<TickReport, QueryError> {
        self.shared.run_tick().await
    }

    pub async fn track(&self, pid: Pid) -> Result<Tracked, RegistryError> {
        let mut state = self.shared.state.lock().await;
        state.track(self.shared.source.as_ref(), pid)
    }

    pub async fn untrack(&self, pid: Pid) -> Result<(), RegistryError> {
        self.shared.state.lock().await.untrack(pid)
    }

    pub async fn tracked(&self) -> Vec<Pid> {
        self.shared.state.lock().await.registry().pids()
    }

    pub async fn set_threshold(&self, mb_per_min: f64) -> Result<(), InvalidThreshold> {
        self.shared.state.lock().await.set_threshold(mb_per_min)
    }

    pub async fn threshold(&self) -> f64 {
        self.shared.state.lock().await.threshold()
    }

    pub async fn leak_state(&self) -> LeakState {
        self.shared.state.lock().await.leak_state()
    }

    pub async fn get_summary(&self) -> Option<Summary> {
        self.shared.state.lock().await.summary()
    }

    pub async fn export_history(&self) -> HistoryTable {
        self.shared.state.lock().await.export_history()
    }

    /// Run `f` against a consistent view of the state.
    pub async fn inspect<R>(&self, f: impl FnOnce(&MonitorState) -> R) -> R {
        let state = self.shared.state.lock().await;
        f(&*state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.bus.subscribe()
    }

    pub fn latest_snapshot(&self) -> Option<SnapshotEvent> {
        self.shared.bus.latest()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Option<SnapshotEvent>> {
        self.shared.bus.watch_latest()
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system_info
    }

    pub fn process_details(&self, pid: Pid) -> Result<ProcessDetails, QueryError> {
        self.shared.source.process_details(pid)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

async fn sampling_loop(shared: Arc<Shared>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    // An overrunning tick is followed immediately by the next one
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                // Query errors are logged inside; the loop keeps going
                let _ = shared.run_tick().await;
            }
        }
        if *shutdown.borrow() {
            break;
        }
    }
}
