use super::Side;
use super::level::PriceLevel;
use super::price::PriceKey;
use super::store::PriceLevelStore;
use crate::errors::BookError;
use crate::models::now_ms;

/// Sorted, point-in-time list of the keys holding liquidity on one side.
///
/// Asks come lowest first, bids highest first, so index 0 is always the
/// best price. The view borrows its store: it only lives for one collection
/// pass and must not outlive the book it was taken from.
#[derive(Debug)]
pub struct BookView<'a> {
    store: &'a PriceLevelStore,
    keys: Vec<PriceKey>,
    version: u64,
}

impl<'a> BookView<'a> {
    /// Captures the side, retrying once if a level was inserted or removed
    /// while the keys were being collected and sorted.
    pub fn capture(store: &'a PriceLevelStore) -> Result<Self, BookError> {
        let side = store.side();
        let mut drift = (0, 0);
        for _ in 0..2 {
            let (mut keys, version) = store.positive_keys();
            keys.sort_unstable_by(|a, b| side.order(a.cmp(b)));
            let current = store.version();
            if current == version {
                return Ok(Self {
                    store,
                    keys,
                    version,
                });
            }
            drift = (version, current);
        }

        Err(BookError::ConcurrentModification {
            side,
            expected: drift.0,
            found: drift.1,
        })
    }

    pub fn side(&self) -> Side {
        self.store.side()
    }

    /// Store version the keys were captured against.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the store gained or lost a level since the capture.
    pub fn is_out_of_date(&self) -> bool {
        self.store.version() != self.version
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[PriceKey] {
        &self.keys
    }

    /// Current level for every captured key, best price first.
    ///
    /// A key whose level was removed after the capture yields a zero-quantity
    /// placeholder at the key's rounded price. That is the intended contract:
    /// consumers always get one entry per captured key.
    pub fn levels(&self) -> Vec<PriceLevel> {
        self.top(self.keys.len())
    }

    /// Same as [`levels`](Self::levels), limited to the `depth` best prices.
    pub fn top(&self, depth: usize) -> Vec<PriceLevel> {
        let now = now_ms();
        let levels = self.store.lock();
        self.keys
            .iter()
            .take(depth)
            .map(|key| {
                levels
                    .map
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| PriceLevel::placeholder(*key, now))
            })
            .collect()
    }

    pub fn best(&self) -> Option<PriceLevel> {
        self.top(1).into_iter().next()
    }

    pub fn iter(&self) -> std::vec::IntoIter<PriceLevel> {
        self.levels().into_iter()
    }
}

impl<'v> IntoIterator for &'v BookView<'_> {
    type Item = PriceLevel;
    type IntoIter = std::vec::IntoIter<PriceLevel>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceQuantity;

    fn store_with(side: Side, prices: &[(f64, f64)]) -> PriceLevelStore {
        let store = PriceLevelStore::new(side);
        store.set_removal_allowed(true);
        let entries: Vec<_> = prices
            .iter()
            .map(|(p, q)| PriceQuantity::new(*p, *q))
            .collect();
        store.apply_batch(&entries, 1, 1);
        store
    }

    fn prices(view: &BookView<'_>) -> Vec<f64> {
        view.iter().map(|l| l.price()).collect()
    }

    #[test]
    fn asks_ascend_bids_descend() {
        let asks = store_with(Side::Ask, &[(102.0, 1.0), (100.0, 1.0), (101.0, 1.0)]);
        let bids = store_with(Side::Bid, &[(98.0, 1.0), (99.0, 1.0), (97.0, 1.0)]);

        let ask_view = BookView::capture(&asks).unwrap();
        let bid_view = BookView::capture(&bids).unwrap();

        assert_eq!(prices(&ask_view), vec![100.0, 101.0, 102.0]);
        assert_eq!(prices(&bid_view), vec![99.0, 98.0, 97.0]);
        assert_eq!(bid_view.best().map(|l| l.price()), Some(99.0));
    }

    #[test]
    fn zero_levels_are_not_captured() {
        let asks = store_with(Side::Ask, &[(100.0, 1.0), (101.0, 1.0)]);
        asks.apply_batch(&[PriceQuantity::new(101.0, 0.0)], 2, 2);
        let view = BookView::capture(&asks).unwrap();
        assert_eq!(view.len(), 1);
        assert!(view.iter().all(|l| l.quantity > 0.0));
    }

    #[test]
    fn vanished_level_reads_as_placeholder() {
        let asks = store_with(Side::Ask, &[(100.0, 1.0), (101.0, 2.0)]);
        let view = BookView::capture(&asks).unwrap();
        asks.prune(Some(u64::MAX));

        assert!(view.is_out_of_date());
        let levels = view.levels();
        assert_eq!(levels.len(), 2);
        assert!(levels.iter().all(|l| l.quantity == 0.0));
        assert!((levels[1].price() - 101.0).abs() < 1e-5);
    }

    #[test]
    fn in_place_writes_keep_the_view_current() {
        let asks = store_with(Side::Ask, &[(100.0, 1.0)]);
        let view = BookView::capture(&asks).unwrap();
        asks.apply_batch(&[PriceQuantity::new(100.0, 4.0)], 2, 2);
        assert!(!view.is_out_of_date());
        assert_eq!(view.best().map(|l| l.quantity), Some(4.0));
    }

    #[test]
    fn capture_retries_once_after_a_concurrent_insert() {
        let asks = store_with(Side::Ask, &[(100.0, 1.0), (101.0, 1.0)]);
        asks.drift_next_scans(1);
        let view = BookView::capture(&asks).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.version(), asks.version());
        assert!(!view.is_out_of_date());
    }

    #[test]
    fn second_concurrent_insert_fails_the_capture() {
        let bids = store_with(Side::Bid, &[(99.0, 1.0)]);
        let before = bids.version();
        bids.drift_next_scans(2);
        let err = BookView::capture(&bids).unwrap_err();
        assert_eq!(
            err,
            BookError::ConcurrentModification {
                side: Side::Bid,
                expected: before + 1,
                found: before + 2,
            }
        );

        // the next pass captures normally
        assert!(BookView::capture(&bids).is_ok());
    }

    #[test]
    fn top_limits_depth() {
        let asks = store_with(Side::Ask, &[(100.0, 1.0), (101.0, 1.0), (102.0, 1.0)]);
        let view = BookView::capture(&asks).unwrap();
        let top: Vec<f64> = view.top(2).iter().map(|l| l.price()).collect();
        assert_eq!(top, vec![100.0, 101.0]);
    }
}
