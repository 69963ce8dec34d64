//! Integration tests for the store manager

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use feed_conflation::types::row_from_value;
use feed_conflation::utils::now_millis;
use feed_conflation::{
    ConflationConfig, ConflationConfigUpdate, ConflationError, FeedConfig, ManagerConfig, Row,
    StoreManager, UpdateKind, UpdateOperation,
};

const ROW_BYTES: usize = 100 * 1024;

fn rows(prefix: &str, count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| row_from_value(json!({ "id": format!("{}-{}", prefix, i), "px": i })).unwrap())
        .collect()
}

fn manager(max_stores: usize) -> Arc<StoreManager> {
    StoreManager::new(ManagerConfig::new(max_stores, 500.0).unwrap()).unwrap()
}

/// 1 MB budget with 100 KB rows: eleven rows fit, twelve do not
fn small_budget_manager() -> Arc<StoreManager> {
    let config = ManagerConfig {
        max_stores: 10,
        memory_limit_mb: 1.0,
        average_row_size_bytes: ROW_BYTES,
        default_conflation: ConflationConfig::default(),
    };
    StoreManager::new(config).unwrap()
}

#[test]
fn test_capacity_evicts_least_recently_used() {
    let manager = manager(2);
    let a = manager.create_store(FeedConfig::new("A", "id")).unwrap();
    manager.create_store(FeedConfig::new("B", "id")).unwrap();
    manager.create_store(FeedConfig::new("C", "id")).unwrap();

    assert!(manager.get_store("A").is_none());
    assert!(manager.get_statistics("A").is_none());
    assert!(manager.get_store("B").is_some());
    assert!(manager.get_store("C").is_some());
    assert!(a.is_destroyed());
    assert_eq!(manager.store_count(), 2);
}

#[test]
fn test_lookup_refreshes_recency() {
    let manager = manager(2);
    manager.create_store(FeedConfig::new("A", "id")).unwrap();
    manager.create_store(FeedConfig::new("B", "id")).unwrap();

    // A becomes most recent, so B is the eviction candidate
    manager.get_store("A").unwrap();
    manager.create_store(FeedConfig::new("C", "id")).unwrap();

    assert!(manager.peek_store("A").is_some());
    assert!(manager.peek_store("B").is_none());
    assert_eq!(manager.feed_ids(), vec!["A", "C"]);
}

#[test]
fn test_create_existing_refreshes_recency() {
    let manager = manager(2);
    manager.create_store(FeedConfig::new("A", "id")).unwrap();
    manager.create_store(FeedConfig::new("B", "id")).unwrap();
    manager.create_store(FeedConfig::new("A", "id")).unwrap();
    manager.create_store(FeedConfig::new("C", "id")).unwrap();

    assert!(manager.peek_store("A").is_some());
    assert!(manager.peek_store("B").is_none());
}

#[test]
fn test_peek_does_not_refresh_recency() {
    let manager = manager(2);
    manager.create_store(FeedConfig::new("A", "id")).unwrap();
    manager.create_store(FeedConfig::new("B", "id")).unwrap();

    manager.peek_store("A").unwrap();
    manager.peek_statistics("A").unwrap();
    manager.create_store(FeedConfig::new("C", "id")).unwrap();

    assert!(manager.peek_store("A").is_none());
}

#[test]
fn test_memory_budget_evicts_lru_after_snapshot() {
    let manager = small_budget_manager();
    let a = manager.create_store(FeedConfig::new("A", "id")).unwrap();
    let b = manager.create_store(FeedConfig::new("B", "id")).unwrap();

    a.set_snapshot(rows("a", 6)).unwrap();
    assert_eq!(manager.store_count(), 2);

    b.set_snapshot(rows("b", 6)).unwrap();

    assert!(a.is_destroyed());
    assert!(!b.is_destroyed());
    assert_eq!(manager.feed_ids(), vec!["B"]);
    assert!(manager.total_memory_mb() <= 1.0);
}

#[test]
fn test_memory_budget_checked_after_flush() {
    let manager = small_budget_manager();
    let a = manager.create_store(FeedConfig::new("A", "id")).unwrap();
    let b = manager.create_store(FeedConfig::new("B", "id")).unwrap();
    a.set_snapshot(rows("a", 8)).unwrap();

    b.add_bulk_updates(rows("b", 8), UpdateKind::Add).unwrap();
    assert_eq!(manager.store_count(), 2);
    b.flush().unwrap();

    assert!(a.is_destroyed());
    assert_eq!(manager.store_count(), 1);
}

#[test]
fn test_memory_check_keeps_last_store() {
    let manager = small_budget_manager();
    let only = manager.create_store(FeedConfig::new("big", "id")).unwrap();
    only.set_snapshot(rows("big", 20)).unwrap();

    assert!(manager.total_memory_mb() > 1.0);
    assert!(manager.check_memory().is_empty());
    assert!(!only.is_destroyed());
    assert_eq!(only.snapshot_len(), 20);
}

#[test]
fn test_check_memory_under_budget_is_noop() {
    let manager = small_budget_manager();
    let a = manager.create_store(FeedConfig::new("A", "id")).unwrap();
    a.set_snapshot(rows("a", 2)).unwrap();
    manager.create_store(FeedConfig::new("B", "id")).unwrap();

    assert!(manager.check_memory().is_empty());
    assert_eq!(manager.store_count(), 2);
}

#[test]
fn test_flush_forwarded_to_statistics() {
    let manager = manager(10);
    let store = manager.create_store(FeedConfig::new("fx", "id")).unwrap();
    let mut updates = rows("fx", 3);
    updates.extend(rows("fx", 3));

    store.add_bulk_updates(updates, UpdateKind::Update).unwrap();
    store.flush();

    let stats = manager.get_statistics("fx").unwrap();
    let m = stats.get_metrics();
    assert_eq!(m.total_updates_received, 6);
    assert_eq!(m.updates_applied, 3);
    assert_eq!(m.updates_conflated, 3);
    assert_eq!(m.conflation_ratio, 50.0);
    assert_eq!(m.snapshot_size, 3);
    assert_eq!(stats.success_rate(), 100.0);
}

#[test]
fn test_snapshot_memory_forwarded_to_statistics() {
    let manager = small_budget_manager();
    let store = manager.create_store(FeedConfig::new("fx", "id")).unwrap();
    store.set_snapshot(rows("fx", 4)).unwrap();

    let m = manager.get_statistics("fx").unwrap().get_metrics();
    assert_eq!(m.snapshot_size, 4);
    assert!((m.memory_usage_mb - 0.390625).abs() < 1e-9);
}

#[test]
fn test_snapshot_rows_without_key_count_as_failed() {
    let manager = manager(10);
    let store = manager.create_store(FeedConfig::new("fx", "id")).unwrap();
    store
        .add_bulk_updates(rows("fx", 3), UpdateKind::Add)
        .unwrap();
    store.flush().unwrap();

    let mut snapshot = rows("snap", 2);
    snapshot.push(row_from_value(json!({ "px": 1 })).unwrap());
    assert_eq!(store.set_snapshot(snapshot).unwrap(), 2);

    let stats = manager.get_statistics("fx").unwrap();
    let m = stats.get_metrics();
    assert_eq!(m.failed_updates, 1);
    assert_eq!(m.total_updates_received, 4);
    assert_eq!(m.snapshot_size, 2);
    assert_eq!(stats.success_rate(), 75.0);
    assert_eq!(store.get_metrics().failed_updates, 1);
}

#[test]
fn test_idle_windows_decay_rates_in_statistics() {
    let manager = manager(10);
    let store = manager.create_store(FeedConfig::new("fx", "id")).unwrap();

    // One second of traffic that leaves the 10 s rate window about 1.15 s from now
    let start = now_millis() - 9_850;
    for i in 0..1000 {
        let row = row_from_value(json!({ "id": format!("k{}", i % 10), "px": i })).unwrap();
        store
            .add_operation(UpdateOperation::at(row, UpdateKind::Update, start + i))
            .unwrap();
    }
    store.flush().unwrap();

    let stats = manager.get_statistics("fx").unwrap();
    let burst = store.get_metrics();
    assert!(burst.current_update_rate > 0.0);
    assert_eq!(burst.peak_update_rate, burst.current_update_rate);
    assert_eq!(stats.get_metrics().current_update_rate, burst.current_update_rate);

    std::thread::sleep(Duration::from_millis(1_300));
    assert!(store.flush().is_none());

    let decayed = store.get_metrics();
    assert_eq!(decayed.current_update_rate, 0.0);
    assert_eq!(decayed.peak_update_rate, burst.peak_update_rate);
    assert!(decayed.average_update_rate < burst.average_update_rate);

    let m = stats.get_metrics();
    assert_eq!(m.current_update_rate, 0.0);
    assert_eq!(m.peak_update_rate, burst.peak_update_rate);
    assert_eq!(m.average_update_rate, decayed.average_update_rate);
}

#[test]
fn test_feed_config_kept_with_entry() {
    let manager = manager(10);
    let conflation = ConflationConfig::new(50, 200, true).unwrap();
    manager
        .create_store(
            FeedConfig::new("fx", "symbol")
                .with_name("FX spot")
                .with_conflation(conflation),
        )
        .unwrap();
    manager.create_store(FeedConfig::new("rates", "tenor")).unwrap();

    let fx = manager.feed_config("fx").unwrap();
    assert_eq!(fx.key_field, "symbol");
    assert_eq!(fx.name.as_deref(), Some("FX spot"));
    assert_eq!(fx.conflation, Some(conflation));

    // Unconfigured feeds report the default they were created with
    let rates = manager.feed_config("rates").unwrap();
    assert_eq!(rates.conflation, Some(ConflationConfig::default()));

    manager
        .update_store_config("fx", &ConflationConfigUpdate::default().window_ms(20))
        .unwrap();
    assert_eq!(manager.feed_config("fx").unwrap().conflation.unwrap().window_ms, 20);

    manager.remove_store("fx");
    assert!(manager.feed_config("fx").is_none());
}

#[test]
fn test_update_store_config_forwards() {
    let manager = manager(10);
    manager.create_store(FeedConfig::new("fx", "id")).unwrap();

    let updated = manager
        .update_store_config("fx", &ConflationConfigUpdate::default().window_ms(20))
        .unwrap();
    assert_eq!(updated.window_ms, 20);
    assert_eq!(manager.peek_store("fx").unwrap().config().window_ms, 20);

    let err = manager
        .update_store_config("fx", &ConflationConfigUpdate::default().max_batch_size(0))
        .unwrap_err();
    assert!(matches!(err, ConflationError::InvalidConfig { .. }));
    assert_eq!(manager.peek_store("fx").unwrap().config().max_batch_size, 1000);
}

#[test]
fn test_clear_destroys_everything() {
    let manager = manager(10);
    let a = manager.create_store(FeedConfig::new("A", "id")).unwrap();
    let b = manager.create_store(FeedConfig::new("B", "id")).unwrap();
    let stats = manager.get_statistics("A").unwrap();

    manager.clear();

    assert_eq!(manager.store_count(), 0);
    assert!(a.is_destroyed());
    assert!(b.is_destroyed());
    assert!(stats.is_destroyed());
    manager.clear();
}

#[test]
fn test_invalid_manager_config_rejected() {
    assert!(ManagerConfig::new(0, 500.0).is_err());
    assert!(ManagerConfig::new(10, 0.0).is_err());

    let config = ManagerConfig {
        memory_limit_mb: -1.0,
        ..ManagerConfig::default()
    };
    assert!(StoreManager::new(config).is_err());
}

#[tokio::test]
async fn test_stores_created_inside_runtime_flush_on_their_own() {
    let config = ManagerConfig {
        default_conflation: ConflationConfig::new(10, 1000, true).unwrap(),
        ..ManagerConfig::default()
    };
    let manager = StoreManager::new(config).unwrap();
    let store = manager.create_store(FeedConfig::new("fx", "id")).unwrap();
    let mut events = store.subscribe();

    store.add_bulk_updates(rows("fx", 2), UpdateKind::Add).unwrap();
    let msg = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
        .await
        .expect("batch within timeout")
        .unwrap();

    assert_eq!(msg.feed_id, "fx");
    assert_eq!(store.snapshot_len(), 2);
}
