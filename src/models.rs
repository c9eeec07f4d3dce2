//! Typed market-data messages exchanged between the transport, the REST
//! collaborators and the sync core.

use crate::errors::BookError;
use serde::Serialize;

/// One `(price, quantity)` pair of a diff or snapshot side.
/// A quantity of zero (or below) means "no liquidity left at this price".
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceQuantity {
    pub price: f64,
    pub quantity: f64,
}

impl PriceQuantity {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Incremental depth update for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthDiff {
    pub symbol: String,
    /// `U`
    pub first_update_id: i64,
    /// `u`
    pub final_update_id: i64,
    /// `pu`, only sent by futures streams.
    pub previous_final_update_id: Option<i64>,
    pub asks: Vec<PriceQuantity>,
    pub bids: Vec<PriceQuantity>,
    /// Event time, unix millis.
    pub event_ms: u64,
}

/// Full REST depth snapshot for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthSnapshot {
    pub last_update_id: i64,
    pub asks: Vec<PriceQuantity>,
    pub bids: Vec<PriceQuantity>,
    /// Server time of the snapshot, unix millis, when the venue reports one.
    pub server_ms: Option<u64>,
}

impl DepthSnapshot {
    /// Lowest bid price in the snapshot.
    pub fn min_bid(&self) -> Option<f64> {
        self.bids.iter().map(|e| e.price).reduce(f64::min)
    }

    /// Highest ask price in the snapshot.
    pub fn max_ask(&self) -> Option<f64> {
        self.asks.iter().map(|e| e.price).reduce(f64::max)
    }

    /// Rejects what a book must never be fed: non-finite or non-positive
    /// prices, non-finite quantities, and a bid above an ask.
    pub fn validate(&self) -> Result<(), BookError> {
        for (side, entries) in [("ask", &self.asks), ("bid", &self.bids)] {
            if let Some(bad) = entries
                .iter()
                .find(|e| !(e.price.is_finite() && e.price > 0.0) || !e.quantity.is_finite())
            {
                return Err(BookError::InvalidSnapshot(format!(
                    "{side} {} @ {}",
                    bad.quantity, bad.price
                )));
            }
        }
        if let (Some(min_bid), Some(max_ask)) = (self.min_bid(), self.max_ask()) {
            if min_bid > max_ask {
                return Err(BookError::InvalidSnapshot(format!(
                    "min bid {min_bid} is above max ask {max_ask}"
                )));
            }
        }
        Ok(())
    }
}

/// Wall clock in unix millis.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
