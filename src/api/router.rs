use super::{AppState, handlers};
use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the router with all status routes and shared state.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/books", get(handlers::get_books))
        .route("/books/{symbol}", get(handlers::get_book))
        .route("/sync", get(handlers::get_sync))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExchangeError;
    use crate::exchanges::{SnapshotProvider, WeightBudget};
    use crate::handlers::{BookHandler, SummaryHandler};
    use crate::models::{DepthDiff, DepthSnapshot, PriceQuantity};
    use crate::orderbook::SymbolBookRegistry;
    use crate::sync::{SchedulerOptions, SyncScheduler};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Offline;

    #[async_trait]
    impl SnapshotProvider for Offline {
        fn name(&self) -> &'static str {
            "offline"
        }
        fn snapshot_weight(&self, _depth: usize) -> u32 {
            1
        }
        async fn fetch_snapshot(&self, _symbol: &str, _depth: usize) -> Result<DepthSnapshot, ExchangeError> {
            Err(ExchangeError::UnexpectedData("offline".into()))
        }
    }

    impl WeightBudget for Offline {
        fn available_weight(&self) -> u32 {
            0
        }
    }

    async fn state() -> AppState {
        let scheduler = Arc::new(SyncScheduler::new(
            SymbolBookRegistry::new(),
            Arc::new(Offline),
            Arc::new(Offline),
            SchedulerOptions::default(),
        ));
        scheduler.dispatch(&DepthDiff {
            symbol: "BTCUSDT".into(),
            first_update_id: 1,
            final_update_id: 2,
            previous_final_update_id: None,
            asks: vec![PriceQuantity::new(101.0, 1.0)],
            bids: vec![PriceQuantity::new(100.0, 1.0)],
            event_ms: 1,
        });

        let summaries = Arc::new(SummaryHandler::new(5));
        let book = scheduler.registry().get("BTCUSDT").unwrap();
        let (asks, bids) = book.capture().unwrap();
        summaries.handle("BTCUSDT", &asks, &bids).await.unwrap();

        AppState {
            scheduler,
            summaries,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, _) = get_json(build(state().await), "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn books_lists_summaries() {
        let (status, json) = get_json(build(state().await), "/books").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["books"][0]["symbol"], "BTCUSDT");
        assert_eq!(json["books"][0]["best_ask"], 101.0);
    }

    #[tokio::test]
    async fn single_book_lookup_ignores_case() {
        let app = build(state().await);
        let (status, json) = get_json(app.clone(), "/books/btcusdt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["best_bid"], 100.0);

        let (status, _) = get_json(app, "/books/ETHUSDT").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_reports_pending_symbols() {
        let (status, json) = get_json(build(state().await), "/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pending"][0], "BTCUSDT");
        assert_eq!(json["symbols"][0]["state"], "pending_resync");
        assert_eq!(json["symbols"][0]["last_update_id"], 2);
        assert_eq!(json["symbols"][0]["ask_levels"], 1);
    }
}
