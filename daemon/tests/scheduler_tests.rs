use leakwatch_daemon::collector::{ScriptedSource, SnapshotSource};
use leakwatch_daemon::config::Config;
use leakwatch_daemon::error::{ConfigError, RegistryError};
use leakwatch_daemon::events::MonitorEvent;
use leakwatch_daemon::registry::Tracked;
use leakwatch_daemon::Monitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

fn monitor_with(source: &Arc<ScriptedSource>) -> Monitor {
    Monitor::new(&Config::default(), source.clone()).unwrap()
}

fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sampling_and_stop() {
    let source = Arc::new(ScriptedSource::new());
    let monitor = monitor_with(&source);

    monitor.start().await;
    assert!(monitor.is_running().await);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    monitor.stop().await;
    assert!(!monitor.is_running().await);

    let ticks = monitor.inspect(|state| state.ticks()).await;
    assert!((3..=5).contains(&ticks), "unexpected tick count {}", ticks);
    assert_eq!(monitor.inspect(|state| state.store().len()).await, ticks as usize);

    // No tick runs after stop returns
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(monitor.inspect(|state| state.ticks()).await, ticks);
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_runs_one_loop() {
    let source = Arc::new(ScriptedSource::new());
    let monitor = monitor_with(&source);

    monitor.start().await;
    monitor.start().await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    monitor.stop().await;

    let ticks = monitor.inspect(|state| state.ticks()).await;
    assert!((2..=4).contains(&ticks), "unexpected tick count {}", ticks);
    assert_eq!(source.host_queries(), ticks);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let source = Arc::new(ScriptedSource::new());
    let monitor = monitor_with(&source);

    // Never started
    monitor.stop().await;

    monitor.start().await;
    monitor.stop().await;
    monitor.stop().await;
    assert!(!monitor.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let source = Arc::new(ScriptedSource::new());
    let monitor = monitor_with(&source);

    monitor.start().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    monitor.stop().await;
    let first = monitor.inspect(|state| state.ticks()).await;

    monitor.start().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    monitor.stop().await;
    assert!(monitor.inspect(|state| state.ticks()).await > first);
}

#[tokio::test]
async fn test_failed_tick_records_nothing() {
    let source = Arc::new(
        ScriptedSource::new().with_self_readings([Some(10.0), None, Some(12.0)]),
    );
    let monitor = monitor_with(&source);
    let mut rx = monitor.subscribe();

    assert!(monitor.tick_now().await.is_ok());
    assert!(monitor.tick_now().await.is_err());
    assert!(monitor.tick_now().await.is_ok());

    let snapshots: Vec<f64> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            MonitorEvent::Snapshot(snapshot) => Some(snapshot.self_mb),
            _ => None,
        })
        .collect();
    assert_eq!(snapshots, vec![10.0, 12.0]);
    assert_eq!(monitor.inspect(|state| state.store().len()).await, 2);
    assert_eq!(monitor.inspect(|state| state.ticks()).await, 2);
}

#[tokio::test]
async fn test_ramp_emits_single_alert() {
    let ramp: Vec<f64> = (0..40).map(|i| 100.0 + 20.0 * i as f64).collect();
    let source = Arc::new(ScriptedSource::new().with_self_series(ramp));
    let monitor = monitor_with(&source);
    let mut rx = monitor.subscribe();

    for _ in 0..40 {
        monitor.tick_now().await.unwrap();
    }

    let alerts: Vec<f64> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            MonitorEvent::LeakAlert(alert) => Some(alert.projected_mb_per_min),
            _ => None,
        })
        .collect();
    assert_eq!(alerts.len(), 1);
    assert!((alerts[0] - 1200.0).abs() < 1e-6);
    assert!(monitor.leak_state().await.is_leak_active);
}

#[tokio::test]
async fn test_alert_published_before_snapshot() {
    let ramp: Vec<f64> = (0..30).map(|i| 20.0 * i as f64).collect();
    let source = Arc::new(ScriptedSource::new().with_self_series(ramp));
    let monitor = monitor_with(&source);

    for _ in 0..29 {
        monitor.tick_now().await.unwrap();
    }
    let mut rx = monitor.subscribe();
    let report = monitor.tick_now().await.unwrap();
    assert!(report.alert.is_some());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], MonitorEvent::LeakAlert(_)));
    assert!(matches!(&events[1], MonitorEvent::Snapshot(s) if s.leak.is_leak_active));

    // Sustained growth does not alert again
    for _ in 0..10 {
        monitor.tick_now().await.unwrap();
    }
    let alerts = drain(&mut rx)
        .into_iter()
        .filter(|event| matches!(event, MonitorEvent::LeakAlert(_)))
        .count();
    assert_eq!(alerts, 0);
}

#[tokio::test]
async fn test_exited_process_is_reported_and_untracked() {
    let source = Arc::new(ScriptedSource::new().with_process(77, [5.0, 6.0]));
    let monitor = monitor_with(&source);
    let mut rx = monitor.subscribe();

    assert_eq!(monitor.track(77).await, Ok(Tracked::Added));
    assert_eq!(monitor.track(77).await, Ok(Tracked::AlreadyTracked));

    let report = monitor.tick_now().await.unwrap();
    assert_eq!(report.snapshot.processes.get(&77), Some(&5.0));

    source.kill(77);
    let report = monitor.tick_now().await.unwrap();
    assert_eq!(report.lost.len(), 1);
    assert_eq!(report.lost[0].0, 77);
    assert!(!report.snapshot.processes.contains_key(&77));
    assert!(monitor.tracked().await.is_empty());

    let lost: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            MonitorEvent::ProcessLost { pid, .. } => Some(pid),
            _ => None,
        })
        .collect();
    assert_eq!(lost, vec![77]);

    let report = monitor.tick_now().await.unwrap();
    assert!(report.lost.is_empty());
    assert_eq!(monitor.untrack(77).await, Err(RegistryError::NotTracked(77)));
}

#[tokio::test]
async fn test_track_unknown_pid() {
    let source = Arc::new(ScriptedSource::new());
    let monitor = monitor_with(&source);
    assert_eq!(monitor.track(4242).await, Err(RegistryError::NotFound(4242)));
    assert!(monitor.tracked().await.is_empty());
}

#[tokio::test]
async fn test_latest_snapshot_and_watch() {
    let source = Arc::new(ScriptedSource::new().with_self_series([1.0, 2.0]));
    let monitor = monitor_with(&source);
    let mut watch = monitor.watch_snapshots();

    assert!(monitor.latest_snapshot().is_none());
    monitor.tick_now().await.unwrap();
    monitor.tick_now().await.unwrap();

    let latest = monitor.latest_snapshot().unwrap();
    assert_eq!(latest.tick, 2);
    assert_eq!(latest.self_mb, 2.0);
    assert_eq!(latest.timestamp, ScriptedSource::timestamp_for(1));

    assert!(watch.has_changed().unwrap());
    assert_eq!(watch.borrow_and_update().as_ref().map(|s| s.tick), Some(2));
}

#[tokio::test]
async fn test_slow_subscriber_lags_without_blocking() {
    let mut config = Config::default();
    config.general.event_buffer = 2;
    let source = Arc::new(ScriptedSource::new());
    let monitor = Monitor::new(&config, source.clone()).unwrap();
    let mut rx = monitor.subscribe();

    for _ in 0..5 {
        monitor.tick_now().await.unwrap();
    }
    assert!(matches!(
        rx.recv().await,
        Err(broadcast::error::RecvError::Lagged(_))
    ));
    assert_eq!(monitor.inspect(|state| state.ticks()).await, 5);
}

#[tokio::test]
async fn test_threshold_and_summary_through_monitor() {
    let source = Arc::new(ScriptedSource::new().with_self_series([10.0, 30.0]));
    let monitor = monitor_with(&source);

    assert!(monitor.get_summary().await.is_none());
    assert!(monitor.set_threshold(0.0).await.is_err());
    assert!(monitor.set_threshold(f64::NAN).await.is_err());
    monitor.set_threshold(25.0).await.unwrap();
    assert_eq!(monitor.threshold().await, 25.0);

    monitor.tick_now().await.unwrap();
    monitor.tick_now().await.unwrap();
    let summary = monitor.get_summary().await.unwrap();
    assert_eq!(summary.samples, 2);
    assert_eq!(summary.self_process.mean, 20.0);
    assert_eq!(monitor.export_history().await.rows.len(), 2);
}

#[test]
fn test_process_details_passthrough() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_total_mb(2048.0)
            .with_process(9, [12.0]),
    );
    let monitor = monitor_with(&source);
    let details = monitor.process_details(9).unwrap();
    assert_eq!(details.memory_mb, 12.0);
    assert!(monitor.process_details(10).is_err());
    assert_eq!(details.memory_percent, 12.0 / 2048.0 * 100.0);
    assert_eq!(monitor.system_info(), &source.system_info());
    assert_eq!(monitor.system_info().total_memory_gb, 2.0);
    assert_eq!(monitor.interval(), Duration::from_secs(1));
}

#[test]
fn test_invalid_config_rejected() {
    let source = Arc::new(ScriptedSource::new());

    let mut config = Config::default();
    config.general.sample_interval_ms = 0;
    assert!(matches!(
        Monitor::new(&config, source.clone()),
        Err(ConfigError::Invalid(_))
    ));

    let mut config = Config::default();
    config.leak.threshold_mb_per_min = f64::INFINITY;
    assert!(matches!(
        Monitor::new(&config, source.clone()),
        Err(ConfigError::Invalid(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ticks_publish_in_order() {
    for _ in 0..50 {
        let mut config = Config::default();
        config.general.event_buffer = 1024;
        let source = Arc::new(ScriptedSource::new());
        let monitor = Arc::new(Monitor::new(&config, source.clone()).unwrap());
        let mut rx = monitor.subscribe();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                tokio::spawn(async move {
                    for _ in 0..20 {
                        monitor.tick_now().await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let ticks: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                MonitorEvent::Snapshot(snapshot) => Some(snapshot.tick),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, (1..=160).collect::<Vec<_>>());
        assert_eq!(monitor.latest_snapshot().map(|s| s.tick), Some(160));
    }
}
