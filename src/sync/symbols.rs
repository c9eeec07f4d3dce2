use super::shutdown::{Shutdown, shutdown_channel};
use crate::errors::ExchangeError;
use crate::exchanges::{DiffTransport, SymbolLister};
use crate::models::DepthDiff;
use crate::pairs::PairFilter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Trading symbols of the venue the filter keeps, sorted.
pub async fn resolve_symbols(
    lister: &dyn SymbolLister,
    filter: &PairFilter,
) -> Result<Vec<String>, ExchangeError> {
    let mut symbols = filter.select(lister.list_symbols(true, true).await?);
    symbols.sort_unstable();
    symbols.dedup();
    Ok(symbols)
}

/// Keeps `transport` streaming the filtered symbol set. Every `refresh` the
/// set is resolved again; when it changed, the transport is stopped and
/// restarted on the new set.
pub async fn run_with_refresh(
    lister: Arc<dyn SymbolLister>,
    transport: Arc<dyn DiffTransport>,
    filter: PairFilter,
    mut symbols: Vec<String>,
    sink: mpsc::Sender<DepthDiff>,
    refresh: Duration,
    shutdown: Shutdown,
) {
    loop {
        let (stop, stream_shutdown) = shutdown_channel();
        let stream = {
            let transport = Arc::clone(&transport);
            let symbols = symbols.clone();
            let sink = sink.clone();
            tokio::spawn(async move { transport.run(symbols, sink, stream_shutdown).await })
        };

        let next = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    stop.trigger();
                    finish(transport.name(), stream).await;
                    return;
                }
                _ = tokio::time::sleep(refresh) => {}
            }

            match resolve_symbols(lister.as_ref(), &filter).await {
                Ok(fresh) if !fresh.is_empty() && fresh != symbols => break fresh,
                Ok(_) => {}
                Err(e) => tracing::error!("[{}] unable to refresh symbols: {e}", transport.name()),
            }
        };

        tracing::info!(
            "[{}] symbol set changed ({} -> {} symbols), restarting streams",
            transport.name(),
            symbols.len(),
            next.len()
        );
        stop.trigger();
        finish(transport.name(), stream).await;
        symbols = next;
    }
}

async fn finish(name: &str, stream: tokio::task::JoinHandle<Result<(), ExchangeError>>) {
    match stream.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("[{name}] stream stopped with error: {e}"),
        Err(e) => tracing::error!("[{name}] stream task failed: {e}"),
    }
}
