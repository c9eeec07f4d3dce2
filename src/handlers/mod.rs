//! Consumers of finished book views, called once per symbol per collection
//! pass.

pub mod summary;

use crate::orderbook::BookView;
use async_trait::async_trait;

pub use summary::{BookSummary, DepthEntry, SummaryHandler};

#[async_trait]
pub trait BookHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads both sides of `symbol`. The views are only valid for the call.
    async fn handle(
        &self,
        symbol: &str,
        asks: &BookView<'_>,
        bids: &BookView<'_>,
    ) -> anyhow::Result<()>;
}
