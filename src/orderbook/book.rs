use super::Side;
use super::price::PriceKey;
use super::store::{BatchOutcome, PriceLevelStore};
use super::view::BookView;
use crate::errors::BookError;
use crate::models::{DepthDiff, DepthSnapshot, now_ms};
use std::sync::atomic::{AtomicI64, Ordering};

/// Result of merging one diff.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiffOutcome {
    /// The diff does not chain onto what the book has seen; resync needed.
    pub gap: bool,
    pub asks: BatchOutcome,
    pub bids: BatchOutcome,
}

/// Result of merging a REST snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub last_update_id: i64,
    pub dropped_asks: usize,
    pub dropped_bids: usize,
    pub full_cleanup_asks: bool,
    pub full_cleanup_bids: bool,
    pub asks: BatchOutcome,
    pub bids: BatchOutcome,
}

/// Levels removed by [`Orderbook::prune`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub zero_asks: usize,
    pub zero_bids: usize,
    pub expired_asks: usize,
    pub expired_bids: usize,
}

impl PruneReport {
    pub fn zeros(&self) -> usize {
        self.zero_asks + self.zero_bids
    }

    pub fn expired(&self) -> usize {
        self.expired_asks + self.expired_bids
    }
}

/// Local order book of one symbol.
///
/// Each side has its own lock, so asks and bids can be written
/// concurrently. `last_update_id` is a high-water mark across both sides and
/// only moves forward.
#[derive(Debug)]
pub struct Orderbook {
    asks: PriceLevelStore,
    bids: PriceLevelStore,
    last_update_id: AtomicI64,
}

impl Default for Orderbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Orderbook {
    pub fn new() -> Self {
        Self {
            asks: PriceLevelStore::new(Side::Ask),
            bids: PriceLevelStore::new(Side::Bid),
            last_update_id: AtomicI64::new(i64::MIN),
        }
    }

    pub fn asks(&self) -> &PriceLevelStore {
        &self.asks
    }

    pub fn bids(&self) -> &PriceLevelStore {
        &self.bids
    }

    pub fn side(&self, side: Side) -> &PriceLevelStore {
        match side {
            Side::Ask => &self.asks,
            Side::Bid => &self.bids,
        }
    }

    /// `i64::MIN` until anything was applied.
    pub fn last_update_id(&self) -> i64 {
        self.last_update_id.load(Ordering::Acquire)
    }

    fn advance(&self, update_id: i64) {
        self.last_update_id.fetch_max(update_id, Ordering::AcqRel);
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Whether diffs may currently evict levels.
    pub fn safe_to_remove_entries(&self) -> bool {
        self.asks.removal_allowed() && self.bids.removal_allowed()
    }

    pub fn set_safe_to_remove_entries(&self, allowed: bool) {
        self.asks.set_removal_allowed(allowed);
        self.bids.set_removal_allowed(allowed);
    }

    /// Forbids removals by diffs until the returned gate is dropped (previous
    /// state restored) or opened.
    pub fn suspend_removals(&self) -> RemovalGate<'_> {
        RemovalGate::close(self)
    }

    /// True when `diff` cannot be chained onto the current state: the book
    /// is empty, `U` skips past the next expected id, or `pu` (when sent)
    /// does not match the last id we applied.
    pub fn has_gap(&self, diff: &DepthDiff) -> bool {
        let last = self.last_update_id();
        if self.is_empty() {
            return true;
        }
        match diff.previous_final_update_id {
            Some(previous) => previous != last,
            None => diff.first_update_id.saturating_sub(last) > 1,
        }
    }

    /// Merges a stream diff. The diff is applied even when it reveals a gap:
    /// the snapshot merge that follows decides which of its levels survive.
    ///
    /// Diffs of one symbol are expected to arrive from a single consumer, in
    /// stream order; the gap check and the merge are not atomic together.
    pub fn apply_diff(&self, diff: &DepthDiff) -> DiffOutcome {
        debug_assert!(diff.first_update_id <= diff.final_update_id);

        let gap = self.has_gap(diff);
        let seq = diff.final_update_id;
        let asks = self.asks.apply_batch(&diff.asks, diff.event_ms, seq);
        let bids = self.bids.apply_batch(&diff.bids, diff.event_ms, seq);
        self.advance(diff.final_update_id.max(diff.first_update_id));

        DiffOutcome { gap, asks, bids }
    }

    /// Removes levels last written at or before `update_id` that a snapshot
    /// covering `[min_bid, max_ask]` proves gone. `cleanup_asks` and
    /// `cleanup_bids` widen the range of their side to every price.
    ///
    /// # Panics
    ///
    /// When `min_bid > max_ask` or `max_ask <= 0`; neither can come out of a
    /// well-formed snapshot.
    pub fn drop_outdated(
        &self,
        update_id: i64,
        min_bid: Option<f64>,
        max_ask: Option<f64>,
        cleanup_asks: bool,
        cleanup_bids: bool,
    ) -> (usize, usize) {
        let (ask_range, bid_range) = drop_ranges(min_bid, max_ask, cleanup_asks, cleanup_bids);
        (
            self.asks.drop_outdated(update_id, ask_range),
            self.bids.drop_outdated(update_id, bid_range),
        )
    }

    /// Merges a REST snapshot taken at `snapshot.last_update_id`.
    ///
    /// Per side, levels the snapshot proves gone are dropped and the snapshot
    /// entries are written, under one lock acquisition. Removals by diffs
    /// are suspended for the duration. Full cleanup of a side happens when
    /// `full_cleanup` says so, or by default when that side of the snapshot
    /// was cut at `depth_limit`.
    pub fn reconcile(
        &self,
        snapshot: &DepthSnapshot,
        full_cleanup: Option<bool>,
        depth_limit: usize,
    ) -> ReconcileReport {
        let gate = RemovalGate::close(self);

        let full_cleanup_asks = full_cleanup.unwrap_or(snapshot.asks.len() >= depth_limit);
        let full_cleanup_bids = full_cleanup.unwrap_or(snapshot.bids.len() >= depth_limit);
        let (ask_range, bid_range) = drop_ranges(
            snapshot.min_bid(),
            snapshot.max_ask(),
            full_cleanup_asks,
            full_cleanup_bids,
        );

        let seq = snapshot.last_update_id;
        let time_ms = snapshot.server_ms.unwrap_or_else(now_ms);
        let (dropped_asks, asks) = self.asks.reconcile(&snapshot.asks, seq, ask_range, time_ms);
        let (dropped_bids, bids) = self.bids.reconcile(&snapshot.bids, seq, bid_range, time_ms);
        self.advance(seq);
        gate.open();

        ReconcileReport {
            last_update_id: self.last_update_id(),
            dropped_asks,
            dropped_bids,
            full_cleanup_asks,
            full_cleanup_bids,
            asks,
            bids,
        }
    }

    /// Collection-pass maintenance of both sides, see
    /// [`PriceLevelStore::prune`].
    pub fn prune(&self, min_ms: Option<u64>) -> PruneReport {
        let (zero_asks, expired_asks) = self.asks.prune(min_ms);
        let (zero_bids, expired_bids) = self.bids.prune(min_ms);
        PruneReport {
            zero_asks,
            zero_bids,
            expired_asks,
            expired_bids,
        }
    }

    pub fn reset_statistics(&self) {
        self.asks.reset_statistics();
        self.bids.reset_statistics();
    }

    /// Ask and bid views for one collection pass.
    pub fn capture(&self) -> Result<(BookView<'_>, BookView<'_>), BookError> {
        Ok((BookView::capture(&self.asks)?, BookView::capture(&self.bids)?))
    }
}

fn drop_ranges(
    min_bid: Option<f64>,
    max_ask: Option<f64>,
    cleanup_asks: bool,
    cleanup_bids: bool,
) -> (
    std::ops::RangeInclusive<PriceKey>,
    std::ops::RangeInclusive<PriceKey>,
) {
    if let Some(max_ask) = max_ask {
        assert!(max_ask > 0.0, "max ask must be positive, got {max_ask}");
    }
    if let (Some(min_bid), Some(max_ask)) = (min_bid, max_ask) {
        assert!(
            min_bid <= max_ask,
            "min bid {min_bid} is greater than max ask {max_ask}"
        );
    }

    let round_min = min_bid
        .and_then(PriceKey::from_price)
        .unwrap_or(PriceKey::MIN);
    let round_max = max_ask
        .and_then(PriceKey::from_price)
        .unwrap_or(PriceKey::MAX);

    let ask_max = if cleanup_asks { PriceKey::MAX } else { round_max };
    let bid_min = if cleanup_bids { PriceKey::MIN } else { round_min };
    (PriceKey::MIN..=ask_max, bid_min..=PriceKey::MAX)
}

/// Suspends removals by diffs; restores the previous state unless opened.
#[must_use = "removals resume as soon as the gate is dropped"]
pub struct RemovalGate<'a> {
    book: &'a Orderbook,
    restore: bool,
}

impl<'a> RemovalGate<'a> {
    fn close(book: &'a Orderbook) -> Self {
        let restore = book.safe_to_remove_entries();
        book.set_safe_to_remove_entries(false);
        Self { book, restore }
    }

    /// Allows removals again, whatever the state was before.
    pub fn open(mut self) {
        self.restore = true;
    }
}

impl Drop for RemovalGate<'_> {
    fn drop(&mut self) {
        self.book.set_safe_to_remove_entries(self.restore);
    }
}
