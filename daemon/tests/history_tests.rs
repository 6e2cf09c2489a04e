use chrono::Utc;
use leakwatch_daemon::collector::HostMemorySample;
use leakwatch_daemon::history::{HistoryBuffer, HistoryStore};

fn host(used_mb: f64) -> HostMemorySample {
    HostMemorySample {
        timestamp: Utc::now(),
        total_mb: 1000.0,
        used_mb,
        free_mb: 1000.0 - used_mb,
        swap_used_mb: 0.0,
        used_percent: used_mb / 10.0,
    }
}

#[test]
fn test_capacity_three_keeps_last_three_in_order() {
    let mut buffer = HistoryBuffer::new(3);
    for i in 1..=5 {
        buffer.push(i);
    }
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.to_vec(), vec![3, 4, 5]);
}

#[test]
fn test_push_returns_evicted_entry() {
    let mut buffer = HistoryBuffer::new(2);
    assert_eq!(buffer.push('a'), None);
    assert_eq!(buffer.push('b'), None);
    assert_eq!(buffer.push('c'), Some('a'));
    assert_eq!(buffer.last(), Some(&'c'));
}

#[test]
fn test_zero_capacity_raised_to_one() {
    let mut buffer = HistoryBuffer::new(0);
    buffer.push(1);
    buffer.push(2);
    assert_eq!(buffer.capacity(), 1);
    assert_eq!(buffer.to_vec(), vec![2]);
}

#[test]
fn test_tail() {
    let mut buffer = HistoryBuffer::new(10);
    for i in 0..6 {
        buffer.push(i);
    }
    assert_eq!(buffer.tail(3).copied().collect::<Vec<_>>(), vec![3, 4, 5]);
    assert_eq!(buffer.tail(50).count(), 6);
}

#[test]
fn test_commit_appends_all_series() {
    let mut store = HistoryStore::new(5);
    let sample = host(100.0);
    assert!(store.begin_tick().record_host(sample).record_self(12.5).commit());

    let view = store.snapshot_view();
    assert_eq!(view.len(), 1);
    assert_eq!(view.timestamps, vec![sample.timestamp]);
    assert_eq!(view.host, vec![sample]);
    assert_eq!(view.self_mb, vec![12.5]);
}

#[test]
fn test_incomplete_tick_records_nothing() {
    let mut store = HistoryStore::new(5);
    assert!(!store.begin_tick().record_host(host(1.0)).commit());
    assert!(!store.begin_tick().record_self(1.0).commit());
    assert!(store.is_empty());
    assert!(store.host().is_empty());
    assert!(store.self_series().is_empty());
}

#[test]
fn test_series_stay_aligned_under_eviction() {
    let mut store = HistoryStore::new(4);
    for i in 0..50u32 {
        // Every third tick loses its self reading and is discarded
        let pending = store.begin_tick().record_host(host(i as f64));
        let committed = if i % 3 == 0 {
            pending.commit()
        } else {
            pending.record_self(i as f64).commit()
        };
        assert_eq!(committed, i % 3 != 0);

        assert!(store.len() <= 4);
        assert_eq!(store.timestamps().len(), store.host().len());
        assert_eq!(store.host().len(), store.self_series().len());
    }
    let view = store.snapshot_view();
    assert_eq!(view.self_mb, vec![44.0, 46.0, 47.0, 49.0]);
    assert_eq!(
        view.host.iter().map(|h| h.used_mb).collect::<Vec<_>>(),
        view.self_mb
    );
}

#[test]
fn test_snapshot_view_is_detached() {
    let mut store = HistoryStore::new(3);
    assert!(store.begin_tick().record_host(host(1.0)).record_self(1.0).commit());
    let view = store.snapshot_view();
    assert!(store.begin_tick().record_host(host(2.0)).record_self(2.0).commit());
    assert_eq!(view.len(), 1);
    assert_eq!(store.len(), 2);
}
