pub mod book;
pub mod level;
pub mod price;
pub mod registry;
pub mod store;
pub mod view;

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

pub use book::{DiffOutcome, Orderbook, PruneReport, ReconcileReport, RemovalGate};
pub use level::{PriceLevel, RunningStats};
pub use price::PriceKey;
pub use registry::SymbolBookRegistry;
pub use store::{BatchOutcome, PriceLevelStore};
pub use view::BookView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ask,
    Bid,
}

impl Side {
    /// Orders keys best-first: asks ascending, bids descending.
    pub fn order(self, ascending: Ordering) -> Ordering {
        match self {
            Side::Ask => ascending,
            Side::Bid => ascending.reverse(),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Ask => f.write_str("ask"),
            Side::Bid => f.write_str("bid"),
        }
    }
}
