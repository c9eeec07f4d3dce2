use super::rate_limit::UsedWeightLimiter;
use super::{DiffTransport, SnapshotProvider, SymbolLister};
use crate::errors::ExchangeError;
use crate::models::{DepthDiff, DepthSnapshot, PriceQuantity};
use crate::sync::Shutdown;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";
const MAX_CONNECTIONS: usize = 128;
const MAX_STREAMS_PER_CONNECTION: usize = 512;
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(60);
const FUTURES_DEPTHS: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];

/// Which Binance venue to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    Spot,
    UsdFutures,
}

impl BinanceMarket {
    pub fn name(self) -> &'static str {
        match self {
            BinanceMarket::Spot => "binance",
            BinanceMarket::UsdFutures => "binance-futures",
        }
    }

    fn rest_base(self) -> &'static str {
        match self {
            BinanceMarket::Spot => "https://api.binance.com",
            BinanceMarket::UsdFutures => "https://fapi.binance.com",
        }
    }

    fn ws_base(self) -> &'static str {
        match self {
            BinanceMarket::Spot => "wss://stream.binance.com:9443",
            BinanceMarket::UsdFutures => "wss://fstream.binance.com",
        }
    }

    fn depth_path(self) -> &'static str {
        match self {
            BinanceMarket::Spot => "/api/v3/depth",
            BinanceMarket::UsdFutures => "/fapi/v1/depth",
        }
    }

    fn exchange_info_path(self) -> &'static str {
        match self {
            BinanceMarket::Spot => "/api/v3/exchangeInfo",
            BinanceMarket::UsdFutures => "/fapi/v1/exchangeInfo",
        }
    }

    fn exchange_info_weight(self) -> u32 {
        match self {
            BinanceMarket::Spot => 20,
            BinanceMarket::UsdFutures => 1,
        }
    }

    pub fn max_depth(self) -> usize {
        match self {
            BinanceMarket::Spot => 5000,
            BinanceMarket::UsdFutures => 1000,
        }
    }

    /// Request weight budget per minute.
    pub fn default_max_weight(self) -> u32 {
        match self {
            BinanceMarket::Spot => 6000,
            BinanceMarket::UsdFutures => 2400,
        }
    }

    /// Clamps `depth` to what the venue accepts. Futures only serve a fixed
    /// set of depths, so the next one up is picked.
    pub fn normalize_depth(self, depth: usize) -> usize {
        let depth = depth.clamp(1, self.max_depth());
        match self {
            BinanceMarket::Spot => depth,
            BinanceMarket::UsdFutures => FUTURES_DEPTHS
                .iter()
                .copied()
                .find(|d| *d >= depth)
                .unwrap_or(1000),
        }
    }

    pub fn depth_weight(self, depth: usize) -> u32 {
        match self {
            BinanceMarket::Spot => match depth {
                0..=100 => 5,
                101..=500 => 25,
                501..=1000 => 50,
                _ => 250,
            },
            BinanceMarket::UsdFutures => match depth {
                0..=99 => 2,
                100..=499 => 5,
                500..=999 => 10,
                _ => 20,
            },
        }
    }

    /// Combined-stream URL carrying the diff depth stream of every symbol.
    pub fn stream_url(self, symbols: &[String], update_speed_ms: u32) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@depth@{update_speed_ms}ms", s.to_lowercase()))
            .collect();
        format!("{}/stream?streams={}", self.ws_base(), streams.join("/"))
    }
}

impl FromStr for BinanceMarket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spot" => Ok(BinanceMarket::Spot),
            "futures" | "usd-futures" | "usdm" => Ok(BinanceMarket::UsdFutures),
            other => Err(format!("unknown market {other:?}, expected spot or futures")),
        }
    }
}

/// The raw JSON shape of a REST depth snapshot
#[derive(Debug, Deserialize)]
struct DepthSnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: i64,

    /// message time, futures only
    #[serde(rename = "E", default)]
    message_time: Option<u64>,

    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// Wrapper of every message on a combined stream. The payload is nested
/// under "data".
#[derive(Debug, Deserialize)]
struct CombinedStreamEnvelope {
    data: DepthUpdateEvent,
}

/// A `depthUpdate` event. Futures streams add `pu`.
#[derive(Debug, Deserialize)]
struct DepthUpdateEvent {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: i64,
    #[serde(rename = "u")]
    final_update_id: i64,
    #[serde(rename = "pu", default)]
    previous_final_update_id: Option<i64>,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

fn parse_levels(raw: Vec<[String; 2]>, side: &str) -> Result<Vec<PriceQuantity>, ExchangeError> {
    raw.into_iter()
        .map(|[price_str, qty_str]| {
            let price = price_str.parse::<f64>().map_err(|_| {
                ExchangeError::UnexpectedData(format!("invalid {side} price {price_str:?}"))
            })?;
            let quantity = qty_str.parse::<f64>().map_err(|_| {
                ExchangeError::UnexpectedData(format!("invalid {side} quantity {qty_str:?}"))
            })?;
            Ok(PriceQuantity::new(price, quantity))
        })
        .collect()
}

/// Parses one combined-stream text frame into a diff.
pub fn parse_depth_event(text: &str) -> Result<DepthDiff, ExchangeError> {
    let envelope: CombinedStreamEnvelope = serde_json::from_str(text)?;
    let event = envelope.data;
    if event.first_update_id > event.final_update_id {
        return Err(ExchangeError::UnexpectedData(format!(
            "{} depth update with U {} > u {}",
            event.symbol, event.first_update_id, event.final_update_id
        )));
    }

    Ok(DepthDiff {
        first_update_id: event.first_update_id,
        final_update_id: event.final_update_id,
        previous_final_update_id: event.previous_final_update_id,
        asks: parse_levels(event.asks, "ask")?,
        bids: parse_levels(event.bids, "bid")?,
        event_ms: event.event_time,
        symbol: event.symbol,
    })
}

/// Parses a REST depth snapshot body.
pub fn parse_snapshot(body: &str) -> Result<DepthSnapshot, ExchangeError> {
    let raw: DepthSnapshotResponse = serde_json::from_str(body)?;
    Ok(DepthSnapshot {
        last_update_id: raw.last_update_id,
        asks: parse_levels(raw.asks, "ask")?,
        bids: parse_levels(raw.bids, "bid")?,
        server_ms: raw.message_time,
    })
}

struct SymbolCache {
    fetched: Instant,
    trading_only: bool,
    symbols: Vec<String>,
}

/// Binance REST client: depth snapshots and symbol listing.
pub struct Binance {
    client: reqwest::Client,
    market: BinanceMarket,
    limiter: Arc<UsedWeightLimiter>,
    symbols_expiry: Duration,
    symbols_cache: Mutex<Option<SymbolCache>>,
}

impl Binance {
    pub fn new(market: BinanceMarket, limiter: Arc<UsedWeightLimiter>, symbols_expiry: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            market,
            limiter,
            symbols_expiry,
            symbols_cache: Mutex::new(None),
        }
    }

    pub fn market(&self) -> BinanceMarket {
        self.market
    }

    pub fn limiter(&self) -> Arc<UsedWeightLimiter> {
        Arc::clone(&self.limiter)
    }

    /// GETs `url` with `weight` accounted against the rate limiter and
    /// returns the body of a successful response.
    async fn get_text(&self, url: &str, weight: u32) -> Result<String, ExchangeError> {
        let registration = self.limiter.register(weight);
        let response = self.client.get(url).send().await?;
        registration.confirm();

        if let Some(used) = response
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.limiter.update_used_weight(used);
        }

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SnapshotProvider for Binance {
    fn name(&self) -> &'static str {
        self.market.name()
    }

    fn snapshot_weight(&self, depth: usize) -> u32 {
        self.market.depth_weight(depth)
    }

    /// Fetches the order book of `symbol` via REST, `depth` levels per side.
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<DepthSnapshot, ExchangeError> {
        let depth = self.market.normalize_depth(depth);
        let url = format!(
            "{}{}?symbol={}&limit={}",
            self.market.rest_base(),
            self.market.depth_path(),
            symbol.to_uppercase(),
            depth
        );

        let body = self.get_text(&url, self.market.depth_weight(depth)).await?;
        let snapshot = parse_snapshot(&body)?;
        tracing::debug!(
            "[{}] {symbol} snapshot lastUpdateId={} asks: {} bids: {}",
            self.name(),
            snapshot.last_update_id,
            snapshot.asks.len(),
            snapshot.bids.len()
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl SymbolLister for Binance {
    async fn list_symbols(
        &self,
        use_cache: bool,
        trading_only: bool,
    ) -> Result<Vec<String>, ExchangeError> {
        if use_cache {
            let cache = self.symbols_cache.lock();
            if let Some(cache) = cache.as_ref() {
                if cache.trading_only == trading_only && cache.fetched.elapsed() < self.symbols_expiry {
                    return Ok(cache.symbols.clone());
                }
            }
        }

        let url = format!("{}{}", self.market.rest_base(), self.market.exchange_info_path());
        let body = self
            .get_text(&url, self.market.exchange_info_weight())
            .await?;
        let info: ExchangeInfoResponse = serde_json::from_str(&body)?;

        let symbols: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| !trading_only || s.status == "TRADING")
            .map(|s| s.symbol)
            .collect();

        tracing::info!("[{}] listed {} symbols", self.market.name(), symbols.len());
        *self.symbols_cache.lock() = Some(SymbolCache {
            fetched: Instant::now(),
            trading_only,
            symbols: symbols.clone(),
        });
        Ok(symbols)
    }
}

/// Number of sockets for `count` symbols: one below 10 symbols, then
/// growing with `log2`, never more than 512 streams per socket.
pub fn connection_count(count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let by_log = if count < 10 {
        1
    } else {
        (count.ilog2() as usize + 1).min(MAX_CONNECTIONS)
    };
    by_log.max(count.div_ceil(MAX_STREAMS_PER_CONNECTION))
}

/// Deals symbols round-robin across `connection_count` sockets.
pub fn split_symbols(symbols: &[String]) -> Vec<Vec<String>> {
    let count = connection_count(symbols.len());
    let mut groups = vec![Vec::new(); count];
    for (i, symbol) in symbols.iter().enumerate() {
        groups[i % count].push(symbol.clone());
    }
    groups
}

/// Diff depth streams over combined-stream websockets.
pub struct BinanceDepthStream {
    market: BinanceMarket,
    update_speed_ms: u32,
}

impl BinanceDepthStream {
    pub fn new(market: BinanceMarket, update_speed_ms: u32) -> Self {
        Self {
            market,
            update_speed_ms,
        }
    }
}

#[async_trait]
impl DiffTransport for BinanceDepthStream {
    fn name(&self) -> &'static str {
        self.market.name()
    }

    /// Spawns one task per socket. Each reconnects on its own; errors are
    /// logged and never take the other sockets down.
    async fn run(
        &self,
        symbols: Vec<String>,
        sink: mpsc::Sender<DepthDiff>,
        shutdown: Shutdown,
    ) -> Result<(), ExchangeError> {
        let groups = split_symbols(&symbols);
        tracing::info!(
            "[{}] streaming {} symbols over {} connections",
            self.name(),
            symbols.len(),
            groups.len()
        );

        let mut connections = JoinSet::new();
        for (id, group) in groups.into_iter().enumerate() {
            let url = self.market.stream_url(&group, self.update_speed_ms);
            connections.spawn(connection_loop(
                self.name(),
                id,
                url,
                sink.clone(),
                shutdown.clone(),
            ));
        }

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!("[{}] connection task failed: {e}", self.name());
            }
        }
        Ok(())
    }
}

async fn connection_loop(
    name: &'static str,
    id: usize,
    url: String,
    sink: mpsc::Sender<DepthDiff>,
    shutdown: Shutdown,
) {
    let mut backoff = Duration::from_secs(1);
    while !shutdown.is_triggered() && !sink.is_closed() {
        match stream_connection(name, id, &url, &sink, &shutdown).await {
            Ok(received) => {
                if received > 0 {
                    backoff = Duration::from_secs(1);
                }
                tracing::warn!("[{name}] connection #{id} closed after {received} messages");
            }
            Err(e) => tracing::error!("[{name}] connection #{id} error: {e}"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
    }
    tracing::debug!("[{name}] connection #{id} stopped");
}

/// Reads one socket until it closes, times out or shutdown fires.
/// Returns the number of diffs forwarded.
async fn stream_connection(
    name: &'static str,
    id: usize,
    url: &str,
    sink: &mpsc::Sender<DepthDiff>,
    shutdown: &Shutdown,
) -> Result<usize, ExchangeError> {
    tracing::debug!("[{name}] connection #{id} connecting");
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| ExchangeError::WebSocket(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();
    let mut received = 0usize;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(received);
            }
            next = tokio::time::timeout(RECEIVE_TIMEOUT, read.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                return Err(ExchangeError::WebSocket(format!(
                    "nothing received for {}s",
                    RECEIVE_TIMEOUT.as_secs()
                )));
            }
            Ok(None) => return Ok(received),
            Ok(Some(msg)) => msg.map_err(|e| ExchangeError::WebSocket(e.to_string()))?,
        };

        match msg {
            Message::Text(text) => {
                let diff = match parse_depth_event(text.as_str()) {
                    Ok(diff) => diff,
                    Err(e) => {
                        tracing::warn!("[{name}] connection #{id} skipped message: {e}");
                        continue;
                    }
                };
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(received),
                    sent = sink.send(diff) => {
                        if sent.is_err() {
                            // consumer is gone
                            return Ok(received);
                        }
                    }
                }
                received += 1;
            }
            Message::Close(_) => return Ok(received),
            _ => {}
        }
    }
}
