pub mod handlers;
pub mod models;
pub mod router;

use crate::handlers::SummaryHandler;
use crate::sync::{Shutdown, SyncScheduler};
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SyncScheduler>,
    pub summaries: Arc<SummaryHandler>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(scheduler: Arc<SyncScheduler>, summaries: Arc<SummaryHandler>) -> Self {
        Self {
            state: AppState {
                scheduler,
                summaries,
            },
        }
    }

    /// Binds the server to `port` and serves until shutdown fires.
    ///
    /// Installs the global Prometheus recorder, so call it once per process.
    pub async fn run(self, port: u16, shutdown: Shutdown) -> anyhow::Result<()> {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        let app = router::build(self.state)
            .route(
                "/metrics",
                get(move || {
                    let handle = metric_handle.clone();
                    async move { handle.render() }
                }),
            )
            .layer(prometheus_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("API server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}
