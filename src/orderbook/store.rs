use super::Side;
use super::level::PriceLevel;
use super::price::PriceKey;
use crate::models::PriceQuantity;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a batch did to one side, entry by entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    /// Older than the level's last write.
    pub stale: usize,
    /// Same sequence id and same quantity as the level's last write.
    pub duplicates: usize,
    /// Unusable price, or a zero quantity for a price we don't hold.
    pub ignored: usize,
}

impl BatchOutcome {
    pub fn structural_changes(&self) -> usize {
        self.inserted + self.removed
    }
}

/// Levels of one side, only reachable through the store's lock.
#[derive(Debug)]
pub(crate) struct Levels {
    pub(crate) map: HashMap<PriceKey, PriceLevel>,
    removal_allowed: bool,
}

enum Action {
    Insert,
    Remove,
    Update,
    Stale,
    Duplicate,
    Ignore,
}

impl Levels {
    fn decide(&self, key: &PriceKey, entry: &PriceQuantity, seq: i64) -> Action {
        let Some(level) = self.map.get(key) else {
            return if entry.quantity > 0.0 {
                Action::Insert
            } else {
                Action::Ignore
            };
        };

        if seq < level.last_applied_seq {
            return Action::Stale;
        }
        if seq == level.last_applied_seq && entry.quantity == level.quantity {
            return Action::Duplicate;
        }

        // a zero written by the same update that created or last touched the
        // level, or a zero on a level that changed since the last pass, stays
        // in place as a zero-quantity level until the collection pass drops it
        if entry.quantity <= 0.0
            && level.change_counter == 0
            && seq != level.last_applied_seq
            && self.removal_allowed
        {
            Action::Remove
        } else {
            Action::Update
        }
    }

    fn apply(&mut self, updates: &[PriceQuantity], time_ms: u64, seq: i64) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for entry in updates {
            if !entry.quantity.is_finite() {
                outcome.ignored += 1;
                continue;
            }
            let Some(key) = PriceKey::from_price(entry.price) else {
                outcome.ignored += 1;
                continue;
            };

            match self.decide(&key, entry, seq) {
                Action::Insert => {
                    self.map
                        .insert(key, PriceLevel::new(entry.price, entry.quantity, time_ms, seq));
                    outcome.inserted += 1;
                }
                Action::Remove => {
                    self.map.remove(&key);
                    outcome.removed += 1;
                }
                Action::Update => {
                    if let Some(level) = self.map.get_mut(&key) {
                        level.update(entry.quantity, time_ms, seq);
                    }
                    outcome.updated += 1;
                }
                Action::Stale => outcome.stale += 1,
                Action::Duplicate => outcome.duplicates += 1,
                Action::Ignore => outcome.ignored += 1,
            }
        }
        outcome
    }

    fn drop_outdated(&mut self, seq: i64, range: &RangeInclusive<PriceKey>) -> usize {
        let before = self.map.len();
        self.map
            .retain(|key, level| !(level.last_applied_seq <= seq && range.contains(key)));
        before - self.map.len()
    }
}

/// One side (asks or bids) of one symbol's book.
///
/// Every mutation runs under a single mutex. `version` is bumped under that
/// mutex whenever a level is inserted or removed, never for in-place
/// quantity writes, so a reader holding a sorted key list can tell whether
/// the key set it sorted is still the current one.
#[derive(Debug)]
pub struct PriceLevelStore {
    side: Side,
    inner: Mutex<Levels>,
    version: AtomicU64,
    /// Key scans still to be followed by a simulated insert.
    #[cfg(test)]
    scan_drifts: std::sync::atomic::AtomicUsize,
}

impl PriceLevelStore {
    /// Removals start disabled; they are enabled once a snapshot has been merged.
    pub fn new(side: Side) -> Self {
        Self {
            side,
            inner: Mutex::new(Levels {
                map: HashMap::new(),
                removal_allowed: false,
            }),
            version: AtomicU64::new(0),
            #[cfg(test)]
            scan_drifts: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    pub fn removal_allowed(&self) -> bool {
        self.inner.lock().removal_allowed
    }

    /// Flipped under the side lock, so no batch observes a half-applied gate.
    pub fn set_removal_allowed(&self, allowed: bool) {
        self.inner.lock().removal_allowed = allowed;
    }

    pub fn get(&self, key: &PriceKey) -> Option<PriceLevel> {
        self.inner.lock().map.get(key).cloned()
    }

    /// Merges `updates` written at sequence id `seq`.
    pub fn apply_batch(&self, updates: &[PriceQuantity], time_ms: u64, seq: i64) -> BatchOutcome {
        if updates.is_empty() {
            return BatchOutcome::default();
        }

        let mut levels = self.inner.lock();
        let outcome = levels.apply(updates, time_ms, seq);
        self.bump(outcome.structural_changes());
        outcome
    }

    /// Removes levels last written at or before `seq` whose key lies in `range`.
    pub fn drop_outdated(&self, seq: i64, range: RangeInclusive<PriceKey>) -> usize {
        let mut levels = self.inner.lock();
        let dropped = levels.drop_outdated(seq, &range);
        self.bump(dropped);
        dropped
    }

    /// `drop_outdated` followed by `apply_batch` of the snapshot entries, under
    /// one lock acquisition so no reader sees the side between the two steps.
    pub fn reconcile(
        &self,
        entries: &[PriceQuantity],
        seq: i64,
        range: RangeInclusive<PriceKey>,
        time_ms: u64,
    ) -> (usize, BatchOutcome) {
        let mut levels = self.inner.lock();
        let dropped = levels.drop_outdated(seq, &range);
        let outcome = levels.apply(entries, time_ms, seq);
        self.bump(dropped + outcome.structural_changes());
        (dropped, outcome)
    }

    /// End-of-pass maintenance under one lock: drops zero levels, resets
    /// statistics, then drops levels not written since `min_ms` when given.
    /// Returns `(zeros, expired)`.
    pub fn prune(&self, min_ms: Option<u64>) -> (usize, usize) {
        let mut levels = self.inner.lock();
        let before = levels.map.len();
        levels.map.retain(|_, level| level.quantity > 0.0);
        let zeros = before - levels.map.len();
        for level in levels.map.values_mut() {
            level.reset_statistics();
        }

        let expired = match min_ms {
            Some(min_ms) => {
                let before = levels.map.len();
                levels.map.retain(|_, level| level.updated_ms >= min_ms);
                before - levels.map.len()
            }
            None => 0,
        };
        self.bump(zeros + expired);
        (zeros, expired)
    }

    pub fn reset_statistics(&self) {
        for level in self.inner.lock().map.values_mut() {
            level.reset_statistics();
        }
    }

    /// Keys of every level holding liquidity, with the version they belong to.
    pub(crate) fn positive_keys(&self) -> (Vec<PriceKey>, u64) {
        let scanned = {
            let levels = self.inner.lock();
            let keys = levels
                .map
                .iter()
                .filter(|(_, level)| level.quantity > 0.0)
                .map(|(key, _)| *key)
                .collect();
            (keys, self.version())
        };
        #[cfg(test)]
        self.drift_after_scan();
        scanned
    }

    /// Makes each of the next `scans` key scans look raced by an insert.
    #[cfg(test)]
    pub(crate) fn drift_next_scans(&self, scans: usize) {
        self.scan_drifts.store(scans, Ordering::Release);
    }

    #[cfg(test)]
    fn drift_after_scan(&self) {
        if self
            .scan_drifts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            self.bump(1);
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Levels> {
        self.inner.lock()
    }

    fn bump(&self, changes: usize) {
        if changes > 0 {
            self.version.fetch_add(changes as u64, Ordering::AcqRel);
        }
    }
}
