//! Conflation Simulator - Binary Entry Point
//!
//! Builds a `StoreManager` from environment config, drives synthetic feeds
//! through it and logs each feed's statistics until Ctrl+C. The final
//! statistics are printed as JSON on exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use feed_conflation::utils::now_millis;
use feed_conflation::{FeedConfig, FeedEvent, ManagerConfig, Row, StoreManager};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);
const TICK_INTERVAL: Duration = Duration::from_millis(2);

/// Synthetic feed: a small key set updated far faster than the window
struct SimulatedFeed {
    id: &'static str,
    key_field: &'static str,
    keys: &'static [&'static str],
    base_price: f64,
}

const FEEDS: &[SimulatedFeed] = &[
    SimulatedFeed {
        id: "fx-spot",
        key_field: "symbol",
        keys: &["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCHF", "USDCAD"],
        base_price: 1.1,
    },
    SimulatedFeed {
        id: "rates-curve",
        key_field: "tenor",
        keys: &["1M", "3M", "6M", "1Y", "2Y", "5Y", "10Y", "30Y"],
        base_price: 4.25,
    },
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,feed_conflation=debug")),
        )
        .init();

    let config = ManagerConfig::from_env()?;
    info!(
        "Starting {} v{} (window {} ms, max batch {})",
        feed_conflation::NAME,
        feed_conflation::VERSION,
        config.default_conflation.window_ms,
        config.default_conflation.max_batch_size
    );
    let manager = StoreManager::new(config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    for feed in FEEDS {
        let feed_config = FeedConfig::new(feed.id, feed.key_field).with_name(feed.id);
        let mut bridge = manager.bridge(feed_config)?;
        let (tx, rx) = mpsc::channel(1024);

        tokio::spawn(async move {
            let handled = bridge.run(rx).await;
            info!(feed_id = %bridge.store().feed_id(), handled, "Feed bridge finished");
        });
        tokio::spawn(simulate(feed, tx, Arc::clone(&running)));
    }

    let mut report = tokio::time::interval(REPORT_INTERVAL);
    report.tick().await;
    while running.load(Ordering::SeqCst) {
        report.tick().await;
        for feed_id in manager.feed_ids() {
            let Some(stats) = manager.peek_statistics(&feed_id) else {
                continue;
            };
            stats.update_connection_uptime();
            let m = stats.get_metrics();
            info!(
                feed_id = %feed_id,
                received = m.total_updates_received,
                applied = m.updates_applied,
                conflation_ratio = m.conflation_ratio,
                current_rate = m.current_update_rate,
                peak_rate = m.peak_update_rate,
                latency_ms = m.average_latency_ms,
                rows = m.snapshot_size,
                uptime_secs = m.connection_uptime_secs,
                "Feed statistics"
            );
        }
        info!(
            stores = manager.store_count(),
            memory_mb = manager.total_memory_mb(),
            "Manager status"
        );
    }

    info!("Shutting down");
    for feed_id in manager.feed_ids() {
        if let Some(stats) = manager.peek_statistics(&feed_id) {
            println!("{}", stats.export_to_json()?);
        }
    }
    manager.clear();
    Ok(())
}

/// Emit a snapshot followed by a stream of updates until shutdown
async fn simulate(
    feed: &'static SimulatedFeed,
    tx: mpsc::Sender<FeedEvent>,
    running: Arc<AtomicBool>,
) {
    let snapshot: Vec<Row> = feed
        .keys
        .iter()
        .map(|key| quote(feed, key, feed.base_price))
        .collect();
    let total_rows = snapshot.len();

    let opening = [
        FeedEvent::Connected,
        FeedEvent::SnapshotStart {
            total_rows: Some(total_rows),
        },
        FeedEvent::SnapshotData {
            rows: snapshot,
            is_last_batch: true,
        },
        FeedEvent::SnapshotComplete { total_rows },
    ];
    for event in opening {
        if tx.send(event).await.is_err() {
            return;
        }
    }

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut tick: u64 = 0;
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        tick += 1;

        let key = feed.keys[(tick as usize * 7) % feed.keys.len()];
        let drift = ((tick % 200) as f64 - 100.0) / 10_000.0;
        let mut events = vec![FeedEvent::Update {
            rows: vec![quote(feed, key, feed.base_price + drift)],
        }];

        if tick % 5_000 == 0 {
            events.push(FeedEvent::Disconnected {
                reason: Some("simulated drop".to_string()),
            });
            events.push(FeedEvent::Connected);
        } else if tick % 1_500 == 0 {
            events.push(FeedEvent::Error {
                error: format!("simulated stale quote for {}", key),
            });
        }

        for event in events {
            if tx.send(event).await.is_err() {
                warn!(feed_id = feed.id, "Feed channel closed");
                return;
            }
        }
    }
}

fn quote(feed: &SimulatedFeed, key: &str, price: f64) -> Row {
    let mut row = Row::new();
    row.insert(feed.key_field.to_string(), json!(key));
    row.insert("price".to_string(), json!((price * 10_000.0).round() / 10_000.0));
    row.insert("ts".to_string(), json!(now_millis()));
    row
}
