use crate::handlers::BookSummary;
use crate::sync::SyncState;
use serde::Serialize;

/// Response for GET /books
#[derive(Serialize)]
pub struct BooksResponse {
    pub books: Vec<BookSummary>,
}

/// One tracked symbol in GET /sync
#[derive(Serialize)]
pub struct SymbolSync {
    pub symbol: String,
    pub state: SyncState,
    /// Absent until the book applied anything.
    pub last_update_id: Option<i64>,
    pub ask_levels: usize,
    pub bid_levels: usize,
}

/// Response for GET /sync
#[derive(Serialize)]
pub struct SyncResponse {
    pub pending: Vec<String>,
    pub symbols: Vec<SymbolSync>,
}
