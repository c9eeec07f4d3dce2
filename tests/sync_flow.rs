use async_trait::async_trait;
use depthkeeper::errors::ExchangeError;
use depthkeeper::exchanges::{SnapshotProvider, WeightBudget};
use depthkeeper::handlers::SummaryHandler;
use depthkeeper::models::{DepthDiff, DepthSnapshot, PriceQuantity, now_ms};
use depthkeeper::orderbook::SymbolBookRegistry;
use depthkeeper::sync::{
    Collector, CollectorOptions, SchedulerOptions, SyncScheduler, SyncState, shutdown_channel,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

struct ScriptedSnapshots {
    snapshots: Mutex<Vec<DepthSnapshot>>,
    calls: AtomicUsize,
}

impl ScriptedSnapshots {
    fn new(snapshots: Vec<DepthSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SnapshotProvider for ScriptedSnapshots {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn snapshot_weight(&self, _depth: usize) -> u32 {
        5
    }

    async fn fetch_snapshot(&self, _symbol: &str, _depth: usize) -> Result<DepthSnapshot, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock();
        if snapshots.is_empty() {
            return Err(ExchangeError::UnexpectedData("no snapshot left".into()));
        }
        Ok(snapshots.remove(0))
    }
}

struct Unlimited;

impl WeightBudget for Unlimited {
    fn available_weight(&self) -> u32 {
        u32::MAX
    }
}

fn diff(first: i64, last: i64, previous: Option<i64>, asks: Vec<PriceQuantity>) -> DepthDiff {
    DepthDiff {
        symbol: "BTCUSD".into(),
        first_update_id: first,
        final_update_id: last,
        previous_final_update_id: previous,
        asks,
        bids: vec![],
        event_ms: now_ms(),
    }
}

fn setup(snapshots: Arc<ScriptedSnapshots>) -> (Arc<SyncScheduler>, Arc<SummaryHandler>, Arc<Collector>) {
    let scheduler = Arc::new(SyncScheduler::new(
        SymbolBookRegistry::new(),
        snapshots,
        Arc::new(Unlimited),
        SchedulerOptions {
            depth_limit: 100,
            ..SchedulerOptions::default()
        },
    ));
    let summaries = Arc::new(SummaryHandler::new(5));
    let collector = Arc::new(Collector::new(
        scheduler.clone(),
        vec![summaries.clone()],
        CollectorOptions::default(),
    ));
    (scheduler, summaries, collector)
}

#[tokio::test(start_paused = true)]
async fn empty_book_is_resynced_then_collected() {
    let snapshots = ScriptedSnapshots::new(vec![DepthSnapshot {
        last_update_id: 105,
        asks: vec![PriceQuantity::new(30000.0, 1.5)],
        bids: vec![],
        server_ms: Some(now_ms()),
    }]);
    let (scheduler, summaries, collector) = setup(snapshots.clone());
    let (trigger, shutdown) = shutdown_channel();
    let (tx, rx) = mpsc::channel(16);
    let tasks = scheduler.spawn(rx, shutdown);

    // the first diff finds an empty book; its level is proven gone by the snapshot
    tx.send(diff(100, 105, None, vec![PriceQuantity::new(29990.0, 1.0)]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(snapshots.calls.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state("BTCUSD"), SyncState::Synced);
    let book = scheduler.registry().get("BTCUSD").unwrap();
    assert_eq!(book.last_update_id(), 105);
    {
        let (asks, bids) = book.capture().unwrap();
        let levels: Vec<(f64, f64)> = asks.iter().map(|l| (l.price(), l.quantity)).collect();
        assert_eq!(levels, vec![(30000.0, 1.5)]);
        assert!(bids.is_empty());
    }

    collector.collect_once().await;
    assert_eq!(summaries.get("BTCUSD").unwrap().best_ask, Some(30000.0));

    // chained diff zeroing the ask: gone after the next pass
    tx.send(diff(106, 106, Some(105), vec![PriceQuantity::new(30000.0, 0.0)]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(book.last_update_id(), 106);
    assert!(scheduler.pending().is_empty());

    collector.collect_once().await;
    assert!(book.asks().is_empty());
    assert_eq!(snapshots.calls.load(Ordering::SeqCst), 1);

    trigger.trigger();
    tasks.join().await;
}

#[tokio::test(start_paused = true)]
async fn previous_id_mismatch_schedules_one_resync() {
    let snapshots = ScriptedSnapshots::new(vec![
        DepthSnapshot {
            last_update_id: 10,
            asks: vec![PriceQuantity::new(101.0, 1.0)],
            bids: vec![PriceQuantity::new(99.0, 1.0)],
            server_ms: None,
        },
        DepthSnapshot {
            last_update_id: 60,
            asks: vec![PriceQuantity::new(102.0, 3.0)],
            bids: vec![PriceQuantity::new(99.0, 2.0)],
            server_ms: None,
        },
    ]);
    let (scheduler, _, _) = setup(snapshots.clone());

    scheduler.dispatch(&diff(5, 10, Some(4), vec![]));
    scheduler.resync("BTCUSD").await.unwrap();
    scheduler.pending().remove("BTCUSD");

    // 50 breaks the chain; the diffs after it chain onto 50
    assert!(scheduler.dispatch(&diff(50, 50, Some(49), vec![])).gap);
    assert!(!scheduler.dispatch(&diff(51, 51, Some(50), vec![])).gap);
    assert!(!scheduler.dispatch(&diff(52, 52, Some(51), vec![])).gap);
    assert_eq!(scheduler.pending().snapshot(), vec!["BTCUSD"]);

    let (trigger, shutdown) = shutdown_channel();
    let (_tx, rx) = mpsc::channel(1);
    let tasks = scheduler.spawn(rx, shutdown);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(snapshots.calls.load(Ordering::SeqCst), 2);
    let book = scheduler.registry().get("BTCUSD").unwrap();
    assert_eq!(book.last_update_id(), 60);
    let (asks, bids) = book.capture().unwrap();
    assert_eq!(asks.best().map(|l| l.price()), Some(102.0));
    assert_eq!(bids.best().map(|l| l.quantity), Some(2.0));

    trigger.trigger();
    tasks.join().await;
}

#[test]
fn out_of_order_batches_keep_the_newest_write() {
    let registry = SymbolBookRegistry::new();
    let book = registry.get_or_create("BTCUSD");
    let asks = book.asks();

    std::thread::scope(|s| {
        s.spawn(|| asks.apply_batch(&[PriceQuantity::new(100.0, 10.0)], 1, 10));
    });
    std::thread::scope(|s| {
        s.spawn(|| asks.apply_batch(&[PriceQuantity::new(100.0, 9.0)], 1, 9));
    });

    let (view, _) = book.capture().unwrap();
    let best = view.best().unwrap();
    assert_eq!(best.quantity, 10.0);
    assert_eq!(best.last_applied_seq, 10);
}
