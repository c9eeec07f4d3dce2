use super::scheduler::SyncScheduler;
use super::shutdown::Shutdown;
use crate::handlers::BookHandler;
use crate::models::now_ms;
use crate::orderbook::Orderbook;
use parking_lot::Mutex;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub interval: Duration,
    /// Age after which a level nobody wrote to is dropped. `None` disables.
    pub entry_expiry: Option<Duration>,
    /// Above this many books a pass is split across worker tasks.
    pub parallel_threshold: usize,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            entry_expiry: Some(Duration::from_secs(10 * 60 * 60)),
            parallel_threshold: 32,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
    pub books: usize,
    /// Books skipped because a view could not be captured.
    pub skipped: usize,
    pub handler_errors: usize,
    pub dropped_zeros: usize,
    pub dropped_expired: usize,
    pub rescheduled: usize,
}

impl AddAssign for CollectStats {
    fn add_assign(&mut self, other: Self) {
        self.books += other.books;
        self.skipped += other.skipped;
        self.handler_errors += other.handler_errors;
        self.dropped_zeros += other.dropped_zeros;
        self.dropped_expired += other.dropped_expired;
        self.rescheduled += other.rescheduled;
    }
}

/// Periodic collection pass: hands every non-empty book to the handlers,
/// then prunes it.
pub struct Collector {
    scheduler: Arc<SyncScheduler>,
    handlers: Vec<Arc<dyn BookHandler>>,
    options: CollectorOptions,
    last_expiry: Mutex<Option<Instant>>,
}

impl Collector {
    pub fn new(
        scheduler: Arc<SyncScheduler>,
        handlers: Vec<Arc<dyn BookHandler>>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            scheduler,
            handlers,
            options,
            last_expiry: Mutex::new(None),
        }
    }

    /// Cutoff (unix millis) for this pass's expiry, if one is due. Expiry
    /// runs at most every tenth of the expiry age.
    fn expiry_cutoff(&self) -> Option<u64> {
        let expiry = self.options.entry_expiry.filter(|e| !e.is_zero())?;
        let mut last = self.last_expiry.lock();
        if last.is_some_and(|at| at.elapsed() <= expiry / 10) {
            return None;
        }
        *last = Some(Instant::now());
        Some(now_ms().saturating_sub(expiry.as_millis() as u64))
    }

    pub async fn collect_once(self: &Arc<Self>) -> CollectStats {
        let started = Instant::now();
        let cutoff = self.expiry_cutoff();
        let books: Vec<(String, Arc<Orderbook>)> = self
            .scheduler
            .registry()
            .all()
            .into_iter()
            .filter(|(_, book)| !book.is_empty())
            .collect();

        let mut stats = CollectStats::default();
        if books.len() <= self.options.parallel_threshold {
            for (symbol, book) in &books {
                stats += self.collect_book(symbol, book, cutoff).await;
            }
        } else {
            let workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            let chunk_size = books.len().div_ceil(workers);
            let mut tasks = JoinSet::new();
            for chunk in books.chunks(chunk_size) {
                let chunk = chunk.to_vec();
                let collector = Arc::clone(self);
                tasks.spawn(async move {
                    let mut stats = CollectStats::default();
                    for (symbol, book) in &chunk {
                        stats += collector.collect_book(symbol, book, cutoff).await;
                    }
                    stats
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(chunk_stats) => stats += chunk_stats,
                    Err(e) => tracing::error!("collection worker failed: {e}"),
                }
            }
        }

        metrics::histogram!("depthkeeper_collect_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("depthkeeper_levels_dropped_total", "reason" => "zero")
            .increment(stats.dropped_zeros as u64);
        metrics::counter!("depthkeeper_levels_dropped_total", "reason" => "expired")
            .increment(stats.dropped_expired as u64);
        tracing::debug!(
            books = stats.books,
            skipped = stats.skipped,
            dropped_zeros = stats.dropped_zeros,
            "collection pass done in {:?}",
            started.elapsed()
        );
        stats
    }

    async fn collect_book(&self, symbol: &str, book: &Orderbook, cutoff: Option<u64>) -> CollectStats {
        let mut stats = CollectStats::default();
        match book.capture() {
            Ok((asks, bids)) => {
                stats.books = 1;
                for handler in &self.handlers {
                    if let Err(e) = handler.handle(symbol, &asks, &bids).await {
                        stats.handler_errors += 1;
                        tracing::error!(symbol = %symbol, "[{}] handler failed: {e:#}", handler.name());
                    }
                }
            }
            Err(e) => {
                stats.skipped = 1;
                tracing::warn!(symbol = %symbol, "skipping collection: {e}");
                return stats;
            }
        }

        let pruned = book.prune(cutoff);
        stats.dropped_zeros = pruned.zeros();
        stats.dropped_expired = pruned.expired();
        if pruned.expired() > 0 {
            tracing::info!(
                symbol = %symbol,
                asks = pruned.expired_asks,
                bids = pruned.expired_bids,
                "dropped expired levels"
            );
            if self.scheduler.schedule_resync(symbol) {
                stats.rescheduled = 1;
            }
        }
        stats
    }

    /// Runs a pass every `interval` until shutdown fires.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.collect_once().await;
        }
        tracing::debug!("collector stopped");
    }
}
