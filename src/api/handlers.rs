use super::AppState;
use super::models::{BooksResponse, SymbolSync, SyncResponse};
use crate::handlers::BookSummary;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

/// GET /health: simple liveness check
pub async fn health() -> &'static str {
    "OK"
}

/// GET /books: latest summary of every collected book
pub async fn get_books(State(state): State<AppState>) -> Json<BooksResponse> {
    Json(BooksResponse {
        books: state.summaries.all(),
    })
}

/// GET /books/{symbol}: one book (e.g. BTCUSDT)
pub async fn get_book(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<BookSummary>, StatusCode> {
    state
        .summaries
        .get(&symbol.to_uppercase())
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /sync: pending resyncs and the state of every book
pub async fn get_sync(State(state): State<AppState>) -> Json<SyncResponse> {
    let scheduler = &state.scheduler;
    let symbols = scheduler
        .states()
        .into_iter()
        .map(|(symbol, sync_state)| {
            let book = scheduler.registry().get(&symbol);
            SymbolSync {
                last_update_id: book
                    .as_ref()
                    .map(|b| b.last_update_id())
                    .filter(|id| *id != i64::MIN),
                ask_levels: book.as_ref().map_or(0, |b| b.asks().len()),
                bid_levels: book.as_ref().map_or(0, |b| b.bids().len()),
                state: sync_state,
                symbol,
            }
        })
        .collect();

    Json(SyncResponse {
        pending: scheduler.pending().snapshot(),
        symbols,
    })
}
