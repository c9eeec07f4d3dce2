use super::BookHandler;
use crate::models::now_ms;
use crate::orderbook::{BookView, PriceLevel};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

/// One price of a summarized side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthEntry {
    pub price: f64,
    pub quantity: f64,
    /// Writes since the previous pass.
    pub changes: i32,
    /// Mean quantity over those writes.
    pub mean_quantity: Option<f64>,
}

impl From<&PriceLevel> for DepthEntry {
    fn from(level: &PriceLevel) -> Self {
        Self {
            price: level.price(),
            quantity: level.quantity,
            changes: level.change_counter,
            mean_quantity: level.stats.as_ref().map(|s| s.mean),
        }
    }
}

/// Top of book and activity of one symbol, as of the last collection pass.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub symbol: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    pub spread_pct: Option<f64>,
    pub ask_levels: usize,
    pub bid_levels: usize,
    /// Levels written at least once since the previous pass.
    pub changed_levels: usize,
    pub top_asks: Vec<DepthEntry>,
    pub top_bids: Vec<DepthEntry>,
    pub collected_ms: u64,
}

/// Keeps the latest [`BookSummary`] of every symbol for the status API.
#[derive(Debug)]
pub struct SummaryHandler {
    depth: usize,
    summaries: DashMap<String, BookSummary>,
}

impl SummaryHandler {
    /// `depth` is the number of prices kept per side.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            summaries: DashMap::new(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<BookSummary> {
        self.summaries.get(symbol).map(|s| s.clone())
    }

    /// All summaries sorted by symbol.
    pub fn all(&self) -> Vec<BookSummary> {
        let mut all: Vec<_> = self.summaries.iter().map(|e| e.value().clone()).collect();
        all.sort_unstable_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub fn summarize(&self, symbol: &str, asks: &BookView<'_>, bids: &BookView<'_>) -> BookSummary {
        let ask_levels = asks.levels();
        let bid_levels = bids.levels();
        let live = |levels: &[PriceLevel]| -> Vec<DepthEntry> {
            levels
                .iter()
                .filter(|l| l.quantity > 0.0)
                .take(self.depth)
                .map(DepthEntry::from)
                .collect()
        };
        let top_asks = live(&ask_levels);
        let top_bids = live(&bid_levels);

        let best_ask = top_asks.first().map(|e| e.price);
        let best_bid = top_bids.first().map(|e| e.price);
        let (spread, spread_pct) = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => (Some(ask - bid), Some((ask - bid) / bid * 100.0)),
            _ => (None, None),
        };

        BookSummary {
            symbol: symbol.to_string(),
            best_bid,
            best_ask,
            spread,
            spread_pct,
            ask_levels: ask_levels.iter().filter(|l| l.quantity > 0.0).count(),
            bid_levels: bid_levels.iter().filter(|l| l.quantity > 0.0).count(),
            changed_levels: ask_levels
                .iter()
                .chain(bid_levels.iter())
                .filter(|l| l.change_counter > 0)
                .count(),
            top_asks,
            top_bids,
            collected_ms: now_ms(),
        }
    }
}

#[async_trait]
impl BookHandler for SummaryHandler {
    fn name(&self) -> &'static str {
        "summary"
    }

    async fn handle(
        &self,
        symbol: &str,
        asks: &BookView<'_>,
        bids: &BookView<'_>,
    ) -> anyhow::Result<()> {
        let summary = self.summarize(symbol, asks, bids);
        if let (Some(bid), Some(ask)) = (summary.best_bid, summary.best_ask) {
            if bid >= ask {
                tracing::warn!(symbol = %symbol, "crossed book: bid {bid} >= ask {ask}");
            }
        }
        self.summaries.insert(symbol.to_string(), summary);
        Ok(())
    }
}
