//! Integration tests for routing provider events through a feed bridge

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use feed_conflation::types::{row_from_value, ErrorKind};
use feed_conflation::{
    FeedBridge, FeedConfig, FeedEvent, ManagerConfig, Row, StoreEvent, StoreManager,
};

fn quote(symbol: &str, bid: f64) -> Row {
    row_from_value(json!({ "symbol": symbol, "bid": bid })).unwrap()
}

fn setup() -> (Arc<StoreManager>, FeedBridge) {
    let manager = StoreManager::new(ManagerConfig::default()).unwrap();
    let bridge = manager.bridge(FeedConfig::new("fx", "symbol")).unwrap();
    (manager, bridge)
}

#[test]
fn test_snapshot_batches_applied_on_last_batch() {
    let (_manager, mut bridge) = setup();
    let first = vec![quote("EURUSD", 1.08), quote("GBPUSD", 1.27)];
    let second = vec![quote("USDJPY", 151.2)];
    let expected_bytes =
        (serde_json::to_vec(&first).unwrap().len() + serde_json::to_vec(&second).unwrap().len())
            as u64;

    bridge
        .handle(FeedEvent::SnapshotStart {
            total_rows: Some(3),
        })
        .unwrap();
    assert!(bridge.statistics().get_metrics().is_loading_snapshot);

    bridge
        .handle(FeedEvent::SnapshotData {
            rows: first,
            is_last_batch: false,
        })
        .unwrap();
    assert_eq!(bridge.store().snapshot_len(), 0);

    bridge
        .handle(FeedEvent::SnapshotData {
            rows: second,
            is_last_batch: true,
        })
        .unwrap();
    assert_eq!(bridge.store().snapshot_len(), 3);

    bridge
        .handle(FeedEvent::SnapshotComplete { total_rows: 3 })
        .unwrap();

    let m = bridge.statistics().get_metrics();
    assert_eq!(m.snapshot_rows, 3);
    assert_eq!(m.snapshot_bytes, expected_bytes);
    assert!(m.snapshot_duration_ms.is_some());
    assert!(!m.is_loading_snapshot);
    assert_eq!(m.snapshot_size, 3);
}

#[test]
fn test_snapshot_complete_applies_unterminated_batches() {
    let (_manager, mut bridge) = setup();
    bridge
        .handle(FeedEvent::SnapshotStart { total_rows: None })
        .unwrap();
    bridge
        .handle(FeedEvent::SnapshotData {
            rows: vec![quote("EURUSD", 1.08)],
            is_last_batch: false,
        })
        .unwrap();
    bridge
        .handle(FeedEvent::SnapshotComplete { total_rows: 1 })
        .unwrap();

    assert!(bridge.store().get_by_key("EURUSD").is_some());
}

#[test]
fn test_updates_enqueued_then_conflated() {
    let (_manager, mut bridge) = setup();
    bridge
        .handle(FeedEvent::Update {
            rows: vec![quote("EURUSD", 1.08), quote("EURUSD", 1.09)],
        })
        .unwrap();
    assert_eq!(bridge.store().pending_len(), 2);

    bridge.store().flush().unwrap();

    let row = bridge.store().get_by_key("EURUSD").unwrap();
    assert_eq!(row["bid"], json!(1.09));
    let m = bridge.statistics().get_metrics();
    assert_eq!(m.total_updates_received, 2);
    assert_eq!(m.updates_conflated, 1);
}

#[tokio::test]
async fn test_error_recorded_and_forwarded() {
    let (_manager, mut bridge) = setup();
    let mut events = bridge.store().subscribe();

    bridge
        .handle(FeedEvent::Error {
            error: "rate limited".to_string(),
        })
        .unwrap();

    let m = bridge.statistics().get_metrics();
    assert_eq!(m.error_count, 1);
    assert_eq!(m.last_error.unwrap().kind, ErrorKind::Feed);

    let msg = events.recv().await.unwrap();
    assert!(matches!(msg.event, StoreEvent::Error { ref message } if message == "rate limited"));
    assert!(!bridge.store().is_destroyed());
}

#[test]
fn test_reconnect_counted() {
    let (_manager, mut bridge) = setup();
    bridge.handle(FeedEvent::Connected).unwrap();
    bridge
        .handle(FeedEvent::Disconnected {
            reason: Some("heartbeat timeout".to_string()),
        })
        .unwrap();
    bridge.handle(FeedEvent::Connected).unwrap();

    assert_eq!(bridge.statistics().get_metrics().reconnect_count, 1);
}

#[tokio::test]
async fn test_run_consumes_until_channel_closes() {
    let (_manager, mut bridge) = setup();
    let (tx, rx) = mpsc::channel(16);

    tx.send(FeedEvent::Connected).await.unwrap();
    tx.send(FeedEvent::Update {
        rows: vec![quote("EURUSD", 1.08)],
    })
    .await
    .unwrap();
    drop(tx);

    let handled = bridge.run(rx).await;
    assert_eq!(handled, 2);
    // Either still buffered or already applied by the window timer
    assert_eq!(bridge.store().pending_len() + bridge.store().snapshot_len(), 1);
}

#[tokio::test]
async fn test_run_stops_when_store_destroyed() {
    let (manager, mut bridge) = setup();
    let (tx, rx) = mpsc::channel(16);
    manager.remove_store("fx");

    tx.send(FeedEvent::Connected).await.unwrap();
    tx.send(FeedEvent::Update {
        rows: vec![quote("EURUSD", 1.08)],
    })
    .await
    .unwrap();
    tx.send(FeedEvent::Connected).await.unwrap();

    let handled = bridge.run(rx).await;
    assert_eq!(handled, 1);
}
