use crate::errors::ExchangeError;
use crate::models::{DepthDiff, DepthSnapshot};
use crate::sync::Shutdown;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod binance;
pub mod rate_limit;

/// REST depth snapshots.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rate-limit weight of one snapshot request at `depth`.
    fn snapshot_weight(&self, depth: usize) -> u32;

    async fn fetch_snapshot(&self, symbol: &str, depth: usize)
    -> Result<DepthSnapshot, ExchangeError>;
}

/// Tradable symbols of a venue.
#[async_trait]
pub trait SymbolLister: Send + Sync {
    /// `use_cache` allows a recent listing to be returned without a request,
    /// `trading_only` drops symbols that are halted or delisted.
    async fn list_symbols(
        &self,
        use_cache: bool,
        trading_only: bool,
    ) -> Result<Vec<String>, ExchangeError>;
}

/// Remaining request weight the venue will accept right now.
pub trait WeightBudget: Send + Sync {
    fn available_weight(&self) -> u32;
}

/// Streams depth diffs of a symbol set onto a bounded queue.
#[async_trait]
pub trait DiffTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs until `shutdown` fires. Sends wait when the queue is full, so a
    /// slow consumer slows the sockets down instead of losing diffs.
    async fn run(
        &self,
        symbols: Vec<String>,
        sink: mpsc::Sender<DepthDiff>,
        shutdown: Shutdown,
    ) -> Result<(), ExchangeError>;
}
