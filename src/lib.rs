//! Local order books kept in sync from a depth diff stream plus REST
//! snapshots.

pub mod api;
pub mod config;
pub mod errors;
pub mod exchanges;
pub mod handlers;
pub mod models;
pub mod orderbook;
pub mod pairs;
pub mod sync;
