use anyhow::Context;
use depthkeeper::api::ApiServer;
use depthkeeper::config::{Config, LogFormat};
use depthkeeper::exchanges::binance::{Binance, BinanceDepthStream};
use depthkeeper::exchanges::rate_limit::UsedWeightLimiter;
use depthkeeper::handlers::{BookHandler, SummaryHandler};
use depthkeeper::orderbook::SymbolBookRegistry;
use depthkeeper::pairs::PairFilter;
use depthkeeper::sync::{
    Collector, CollectorOptions, SchedulerOptions, SyncScheduler, resolve_symbols,
    run_with_refresh, shutdown_channel,
};
use std::sync::Arc;
use tokio::sync::mpsc;

const UPDATE_SPEED_MS: u32 = 100;
const SUMMARY_DEPTH: usize = 10;

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env());
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let market = config.market;
    tracing::info!(
        "depthkeeper starting on {} with depth {}, API on port {}",
        market.name(),
        config.depth_limit,
        config.api_port
    );

    // ── 1. Resolve the symbols to track ────────────────────────────
    let limiter = UsedWeightLimiter::new(config.max_usable_weight, config.available_weight_ratio);
    let binance = Arc::new(Binance::new(market, Arc::clone(&limiter), config.symbols_refresh));
    let filter = PairFilter::parse(&config.pairs).context("invalid PAIRS entry")?;
    let symbols = resolve_symbols(binance.as_ref(), &filter)
        .await
        .context("unable to list symbols")?;
    if symbols.is_empty() {
        anyhow::bail!("no trading symbol matches PAIRS={:?}", config.pairs);
    }
    tracing::info!("[{}] tracking {} symbols", market.name(), symbols.len());

    // ── 2. Sync core ───────────────────────────────────────────────
    let scheduler = Arc::new(SyncScheduler::new(
        SymbolBookRegistry::new(),
        binance.clone(),
        limiter,
        SchedulerOptions {
            depth_limit: config.depth_limit,
            full_cleanup: config.full_cleanup,
            ..SchedulerOptions::default()
        },
    ));
    let summaries = Arc::new(SummaryHandler::new(SUMMARY_DEPTH));
    let handlers: Vec<Arc<dyn BookHandler>> = vec![summaries.clone()];
    let collector = Arc::new(Collector::new(
        scheduler.clone(),
        handlers,
        CollectorOptions {
            interval: config.collect_interval,
            entry_expiry: config.entry_expiry,
            ..CollectorOptions::default()
        },
    ));

    let (trigger, shutdown) = shutdown_channel();
    let (diff_tx, diff_rx) = mpsc::channel(config.diff_queue_capacity);
    let sync_tasks = scheduler.spawn(diff_rx, shutdown.clone());
    let collector_task = tokio::spawn(collector.run(shutdown.clone()));

    // ── 3. Spawn WebSocket diff streams ────────────────────────────
    let stream_task = tokio::spawn(run_with_refresh(
        binance,
        Arc::new(BinanceDepthStream::new(market, UPDATE_SPEED_MS)),
        filter,
        symbols,
        diff_tx,
        config.symbols_refresh,
        shutdown.clone(),
    ));

    // ── 4. Status API ──────────────────────────────────────────────
    let api_task = tokio::spawn(ApiServer::new(scheduler, summaries).run(config.api_port, shutdown));

    // ── 5. Keep main alive until Ctrl+C ────────────────────────────
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    trigger.trigger();

    if let Err(e) = stream_task.await {
        tracing::error!("stream task failed: {e}");
    }
    sync_tasks.join().await;
    if let Err(e) = collector_task.await {
        tracing::error!("collector task failed: {e}");
    }
    match api_task.await {
        Ok(Err(e)) => tracing::error!("API server failed: {e:#}"),
        Err(e) => tracing::error!("API task failed: {e}"),
        Ok(Ok(())) => {}
    }
    Ok(())
}
