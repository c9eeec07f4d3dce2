use super::pending::PendingSet;
use super::shutdown::Shutdown;
use crate::errors::SyncError;
use crate::exchanges::{SnapshotProvider, WeightBudget};
use crate::models::DepthDiff;
use crate::orderbook::{DiffOutcome, ReconcileReport, SymbolBookRegistry};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DIFF_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unknown,
    PendingResync,
    Synced,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Depth requested from the snapshot provider.
    pub depth_limit: usize,
    /// `None` lets a truncated snapshot decide.
    pub full_cleanup: Option<bool>,
    /// Longest wait for a new pending symbol before looking again.
    pub idle_wait: Duration,
    /// Pause between two resyncs.
    pub poll_delay: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            depth_limit: 1000,
            full_cleanup: None,
            idle_wait: Duration::from_secs(1),
            poll_delay: Duration::from_millis(50),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Routes diffs to their books and keeps every book in sync with the venue.
///
/// Two background tasks run off one scheduler: the diff consumer, which
/// applies diffs in arrival order and flags symbols whose sequence broke,
/// and the resync loop, which serves flagged symbols one REST snapshot at a
/// time within the rate budget.
pub struct SyncScheduler {
    registry: SymbolBookRegistry,
    pending: PendingSet,
    states: DashMap<String, SyncState>,
    snapshots: Arc<dyn SnapshotProvider>,
    budget: Arc<dyn WeightBudget>,
    options: SchedulerOptions,
}

impl SyncScheduler {
    pub fn new(
        registry: SymbolBookRegistry,
        snapshots: Arc<dyn SnapshotProvider>,
        budget: Arc<dyn WeightBudget>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            registry,
            pending: PendingSet::new(),
            states: DashMap::new(),
            snapshots,
            budget,
            options,
        }
    }

    pub fn registry(&self) -> &SymbolBookRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn state(&self, symbol: &str) -> SyncState {
        self.states
            .get(symbol)
            .map(|s| *s)
            .unwrap_or(SyncState::Unknown)
    }

    /// Every known symbol with its state, sorted by symbol.
    pub fn states(&self) -> Vec<(String, SyncState)> {
        let mut states: Vec<_> = self
            .states
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        states.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Flags `symbol` for a resync. Returns false when it already was.
    pub fn schedule_resync(&self, symbol: &str) -> bool {
        self.states
            .insert(symbol.to_string(), SyncState::PendingResync);
        let scheduled = self.pending.schedule(symbol);
        if scheduled {
            tracing::debug!(symbol = %symbol, "scheduling snapshot resync");
        }
        scheduled
    }

    /// Applies one diff, creating the book on first touch.
    pub fn dispatch(&self, diff: &DepthDiff) -> DiffOutcome {
        let book = self.registry.get_or_create(&diff.symbol);
        let outcome = book.apply_diff(diff);
        metrics::counter!("depthkeeper_diffs_applied_total").increment(1);

        if outcome.gap {
            metrics::counter!("depthkeeper_sequence_gaps_total").increment(1);
            self.schedule_resync(&diff.symbol);
        } else {
            self.states
                .entry(diff.symbol.clone())
                .or_insert(SyncState::Unknown);
        }
        outcome
    }

    /// Fetches a snapshot and merges it. Removals by diffs stay suspended
    /// from before the request until the merge is done. A snapshot that
    /// fails validation leaves the book untouched.
    pub async fn resync(&self, symbol: &str) -> Result<ReconcileReport, SyncError> {
        let book = self.registry.get_or_create(symbol);
        let gate = book.suspend_removals();
        let snapshot = self
            .snapshots
            .fetch_snapshot(symbol, self.options.depth_limit)
            .await?;
        snapshot.validate()?;
        let report = book.reconcile(&snapshot, self.options.full_cleanup, self.options.depth_limit);
        gate.open();
        Ok(report)
    }

    /// Applies diffs until the queue closes or shutdown fires.
    pub async fn run_diff_consumer(&self, mut diffs: mpsc::Receiver<DepthDiff>, shutdown: Shutdown) {
        let mut batch = Vec::with_capacity(DIFF_BATCH);
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                n = diffs.recv_many(&mut batch, DIFF_BATCH) => n,
            };
            if received == 0 {
                tracing::info!("diff queue closed");
                break;
            }
            for diff in batch.drain(..) {
                self.dispatch(&diff);
            }
        }
        tracing::debug!("diff consumer stopped");
    }

    /// Serves pending symbols until shutdown fires.
    pub async fn run_resync_loop(&self, shutdown: Shutdown) {
        let weight = self
            .snapshots
            .snapshot_weight(self.options.depth_limit)
            .max(1);
        let mut backoff = self.options.initial_backoff;
        let mut previous: Option<String> = None;

        while !shutdown.is_triggered() {
            let available = self.budget.available_weight();
            if available < weight {
                metrics::counter!("depthkeeper_rate_budget_waits_total").increment(1);
                tracing::debug!(
                    "[{}] weight budget {available} below {weight}, waiting {:?}",
                    self.snapshots.name(),
                    backoff
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(self.options.max_backoff);
                continue;
            }
            backoff = self.options.initial_backoff;

            let Some(symbol) = self.pending.pop_next(previous.as_deref()) else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::timeout(self.options.idle_wait, self.pending.notified()) => {}
                }
                continue;
            };

            if previous.as_deref() == Some(symbol.as_str()) {
                // same symbol twice in a row, nothing else is waiting
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.options.initial_backoff) => {}
                }
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.resync(&symbol) => result,
            };
            match result {
                Ok(report) => {
                    self.pending.remove(&symbol);
                    self.states.insert(symbol.clone(), SyncState::Synced);
                    metrics::counter!("depthkeeper_resyncs_total", "outcome" => "ok").increment(1);
                    tracing::debug!(
                        symbol = %symbol,
                        last_update_id = report.last_update_id,
                        dropped_asks = report.dropped_asks,
                        dropped_bids = report.dropped_bids,
                        "resynced from snapshot"
                    );
                }
                Err(e) => {
                    self.pending.schedule(&symbol);
                    self.states.insert(symbol.clone(), SyncState::PendingResync);
                    metrics::counter!("depthkeeper_resyncs_total", "outcome" => "error").increment(1);
                    tracing::error!(symbol = %symbol, "unable to resync from snapshot: {e}");
                }
            }
            previous = Some(symbol);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.poll_delay) => {}
            }
        }
        tracing::debug!("resync loop stopped");
    }

    /// Starts the diff consumer and the resync loop.
    pub fn spawn(self: &Arc<Self>, diffs: mpsc::Receiver<DepthDiff>, shutdown: Shutdown) -> SyncTasks {
        let consumer = {
            let scheduler = Arc::clone(self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run_diff_consumer(diffs, shutdown).await })
        };
        let resync = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.run_resync_loop(shutdown).await })
        };
        SyncTasks { consumer, resync }
    }
}

/// Handles of the scheduler's background tasks.
#[derive(Debug)]
pub struct SyncTasks {
    consumer: JoinHandle<()>,
    resync: JoinHandle<()>,
}

impl SyncTasks {
    /// Waits for both tasks; meant to be called after shutdown fired.
    pub async fn join(self) {
        for (name, handle) in [("diff consumer", self.consumer), ("resync loop", self.resync)] {
            if let Err(e) = handle.await {
                tracing::error!("{name} task failed: {e}");
            }
        }
    }
}
