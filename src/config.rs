use crate::errors::ConfigError;
use crate::exchanges::binance::BinanceMarket;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Raw pair filter, see [`crate::pairs::PairFilter`].
    pub pairs: String,
    pub api_port: u16,
    pub market: BinanceMarket,
    pub depth_limit: usize,
    pub collect_interval: Duration,
    pub entry_expiry: Option<Duration>,
    pub full_cleanup: Option<bool>,
    pub diff_queue_capacity: usize,
    pub max_usable_weight: u32,
    pub available_weight_ratio: f64,
    pub symbols_refresh: Duration,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; unset and blank values
    /// take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // default to BTCUSDT and ETHUSDT if PAIRS is not set
        let pairs = lookup("PAIRS").unwrap_or_else(|| "BTCUSDT;ETHUSDT".to_string());
        let api_port = parse_or("API_PORT", var("API_PORT"), 3000u16)?;

        let market = match var("BINANCE_MARKET") {
            Some(raw) => raw.parse::<BinanceMarket>().map_err(|reason| ConfigError::Invalid {
                name: "BINANCE_MARKET",
                value: raw.clone(),
                reason,
            })?,
            None => BinanceMarket::Spot,
        };

        let depth_limit = parse_or("DEPTH_LIMIT", var("DEPTH_LIMIT"), market.max_depth())?;
        if depth_limit == 0 || depth_limit > market.max_depth() {
            return Err(ConfigError::Invalid {
                name: "DEPTH_LIMIT",
                value: depth_limit.to_string(),
                reason: format!("must be within 1..={}", market.max_depth()),
            });
        }

        let collect_secs = parse_or("COLLECT_INTERVAL_SECS", var("COLLECT_INTERVAL_SECS"), 10u64)?;
        if collect_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "COLLECT_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let expiry_secs = parse_or("ENTRY_EXPIRY_SECS", var("ENTRY_EXPIRY_SECS"), 36_000u64)?;
        let full_cleanup = var("FULL_CLEANUP_ON_RESYNC")
            .map(|raw| parse_bool("FULL_CLEANUP_ON_RESYNC", &raw))
            .transpose()?;

        let diff_queue_capacity =
            parse_or("DIFF_QUEUE_CAPACITY", var("DIFF_QUEUE_CAPACITY"), 8192usize)?.max(1);
        let max_usable_weight = parse_or(
            "MAX_USABLE_WEIGHT",
            var("MAX_USABLE_WEIGHT"),
            market.default_max_weight(),
        )?;

        let available_weight_ratio =
            parse_or("AVAILABLE_WEIGHT_RATIO", var("AVAILABLE_WEIGHT_RATIO"), 0.8f64)?;
        if !(available_weight_ratio > 0.0 && available_weight_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "AVAILABLE_WEIGHT_RATIO",
                value: available_weight_ratio.to_string(),
                reason: "must be within (0, 1]".into(),
            });
        }

        let symbols_refresh = parse_or("SYMBOLS_REFRESH_SECS", var("SYMBOLS_REFRESH_SECS"), 300u64)?;

        let log_format = match var("LOG_FORMAT").map(|v| v.trim().to_lowercase()) {
            None => LogFormat::Text,
            Some(v) if v == "text" => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: v,
                    reason: "expected text or json".into(),
                });
            }
        };

        Ok(Self {
            pairs,
            api_port,
            market,
            depth_limit: market.normalize_depth(depth_limit),
            collect_interval: Duration::from_secs(collect_secs),
            entry_expiry: (expiry_secs > 0).then(|| Duration::from_secs(expiry_secs)),
            full_cleanup,
            diff_queue_capacity,
            max_usable_weight,
            available_weight_ratio,
            symbols_refresh: Duration::from_secs(symbols_refresh.max(1)),
            log_format,
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.pairs, "BTCUSDT;ETHUSDT");
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.market, BinanceMarket::Spot);
        assert_eq!(config.depth_limit, 5000);
        assert_eq!(config.collect_interval, Duration::from_secs(10));
        assert_eq!(config.entry_expiry, Some(Duration::from_secs(36_000)));
        assert_eq!(config.full_cleanup, None);
        assert_eq!(config.diff_queue_capacity, 8192);
        assert_eq!(config.max_usable_weight, 6000);
        assert_eq!(config.available_weight_ratio, 0.8);
        assert_eq!(config.symbols_refresh, Duration::from_secs(300));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn futures_market_changes_market_defaults() {
        let config = config(&[("BINANCE_MARKET", "futures")]).unwrap();
        assert_eq!(config.market, BinanceMarket::UsdFutures);
        assert_eq!(config.depth_limit, 1000);
        assert_eq!(config.max_usable_weight, 2400);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("PAIRS", "USDT$"),
            ("API_PORT", "8080"),
            ("DEPTH_LIMIT", "100"),
            ("ENTRY_EXPIRY_SECS", "0"),
            ("FULL_CLEANUP_ON_RESYNC", "true"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(config.pairs, "USDT$");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.depth_limit, 100);
        assert_eq!(config.entry_expiry, None);
        assert_eq!(config.full_cleanup, Some(true));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config(&[("API_PORT", "99999")]).unwrap_err();
        assert!(err.to_string().starts_with("API_PORT"));

        let err = config(&[("DEPTH_LIMIT", "6000")]).unwrap_err();
        assert!(err.to_string().starts_with("DEPTH_LIMIT"));

        assert!(config(&[("AVAILABLE_WEIGHT_RATIO", "1.5")]).is_err());
        assert!(config(&[("BINANCE_MARKET", "margin")]).is_err());
        assert!(config(&[("FULL_CLEANUP_ON_RESYNC", "maybe")]).is_err());
        assert!(config(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config(&[("API_PORT", " "), ("FULL_CLEANUP_ON_RESYNC", "")]).unwrap();
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.full_cleanup, None);
    }
}
