//! Which symbols to track.

use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

const SEPARATORS: [char; 3] = ['\r', '\n', ';'];

/// A letter followed by word characters, `:`, `/` or `-`. Anything else is
/// a pattern.
fn is_plain_symbol(entry: &str) -> bool {
    let mut chars = entry.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && entry.len() > 1
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '/' | '-'))
}

/// Case-insensitive symbol filter built from a list of entries.
///
/// Entries are exact symbols (`BTCUSDT`, `BTC:USDT`) or regular expressions
/// (`BTC.*$`, `ETHUSD.{0,2}`), searched anywhere in the symbol. Lines
/// starting with `#` or `//` are comments. A filter without entries matches
/// every symbol.
#[derive(Debug, Default)]
pub struct PairFilter {
    exact: HashSet<String>,
    patterns: Vec<Regex>,
    /// Pattern verdicts, hits and misses, keyed by uppercased symbol.
    cache: DashMap<String, bool>,
}

impl PairFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, regex::Error> {
        let mut filter = Self::new();
        filter.add_all(input)?;
        Ok(filter)
    }

    /// Adds the entries of `input`. On an invalid pattern the entries before
    /// it are kept.
    pub fn add_all(&mut self, input: &str) -> Result<(), regex::Error> {
        self.cache.clear();
        for entry in input.split(SEPARATORS).map(str::trim) {
            if entry.is_empty() || entry.starts_with('#') || entry.starts_with("//") {
                continue;
            }
            if is_plain_symbol(entry) {
                self.exact.insert(entry.to_uppercase());
            } else if !self.patterns.iter().any(|p| p.as_str() == entry) {
                let pattern = RegexBuilder::new(entry).case_insensitive(true).build()?;
                self.patterns.push(pattern);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    pub fn matches(&self, symbol: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        let symbol = symbol.to_uppercase();
        if self.exact.contains(&symbol) {
            return true;
        }
        if let Some(hit) = self.cache.get(&symbol) {
            return *hit;
        }

        let hit = self.patterns.iter().any(|p| p.is_match(&symbol));
        self.cache.insert(symbol, hit);
        hit
    }

    /// Keeps the symbols of `symbols` the filter matches, in order.
    pub fn select(&self, symbols: impl IntoIterator<Item = String>) -> Vec<String> {
        symbols.into_iter().filter(|s| self.matches(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_entries_ignore_case() {
        let filter = PairFilter::parse("BTC-PERP").unwrap();
        assert!(filter.matches("BTC-PERP"));
        assert!(filter.matches("btc-perp"));
        assert!(!filter.matches("eth-perp"));
        assert!(!filter.matches("eth/usd"));
        assert!(filter.patterns.is_empty());
    }

    #[test]
    fn exact_entry_does_not_match_a_longer_symbol() {
        let filter = PairFilter::parse("USDT-PERP;ETH-PERP").unwrap();
        assert!(filter.matches("USDT-PERP"));
        assert!(!filter.matches("CUSDT-PERP"));
        assert!(filter.patterns.is_empty());
    }

    #[test]
    fn separators_whitespace_and_comments() {
        let filter = PairFilter::parse(" BTCUSDT; ETHUSDT \n# SOLUSDT\n// XRPUSDT\r\nBNBUSDT ").unwrap();
        assert!(filter.matches("BTCUSDT"));
        assert!(filter.matches("ETHUSDT"));
        assert!(filter.matches("BNBUSDT"));
        assert!(!filter.matches("SOLUSDT"));
        assert!(!filter.matches("XRPUSDT"));
        assert!(!filter.matches("# SOLUSDT"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        for input in ["", " ;\n# nothing\n", "#BTC-PERP"] {
            let filter = PairFilter::parse(input).unwrap();
            assert!(filter.is_empty());
            assert!(filter.matches("ANYTHING"));
            assert!(filter.matches("eth/usd"));
        }
    }

    #[test]
    fn patterns_search_case_insensitively() {
        let filter = PairFilter::parse("BTC.*$").unwrap();
        assert_eq!(filter.patterns.len(), 1);
        assert!(filter.matches("BTC-PERP"));
        assert!(filter.matches("btc/usd"));
        assert!(filter.matches("btc13ZDSQDq54"));
        assert!(!filter.matches("eth-perp"));
        assert!(!filter.matches("eth/usd"));
    }

    #[test]
    fn mixed_entries() {
        let filter = PairFilter::parse("\n    BTC:USDT\nBTCUSD\nBTC:USDT\nETHUSD.{0,2}\n_LUNA\n#COMMENT\n//COMMENTPAR\n").unwrap();
        assert_eq!(filter.exact.len(), 2);
        // `_LUNA` does not start with a letter, so it is a pattern
        assert_eq!(filter.patterns.len(), 2);

        assert!(filter.matches("btcUsD"));
        assert!(filter.matches("BTC:USDT"));
        assert!(filter.matches("_LUNA"));
        assert!(!filter.matches("LUNA"));
        assert!(filter.matches("ethusdt"));
        assert!(filter.matches("ethusd"));
        assert!(filter.matches("ethusdc"));
        assert!(!filter.matches("ethdai"));
        assert!(!filter.matches("COMMENT"));
        assert!(!filter.matches("COMMENTPAR"));
    }

    #[test]
    fn pattern_verdicts_are_cached_both_ways() {
        let filter = PairFilter::parse("BTCUSDT;USDT$").unwrap();
        assert!(filter.matches("ethusdt"));
        assert!(!filter.matches("ethbtc"));
        assert!(filter.matches("BTCUSDT"));

        assert_eq!(filter.cache.get("ETHUSDT").map(|v| *v), Some(true));
        assert_eq!(filter.cache.get("ETHBTC").map(|v| *v), Some(false));
        // exact entries never reach the cache
        assert!(filter.cache.get("BTCUSDT").is_none());

        // cached answers stay the same
        assert!(!filter.matches("ETHBTC"));
        assert!(filter.matches("ETHUSDT"));
    }

    #[test]
    fn adding_entries_clears_cached_misses() {
        let mut filter = PairFilter::parse("USDT$").unwrap();
        assert!(!filter.matches("ETHBTC"));
        filter.add_all("BTC$").unwrap();
        assert!(filter.matches("ETHBTC"));
    }

    #[test]
    fn plain_symbol_shapes() {
        assert!(is_plain_symbol("BTCUSDT"));
        assert!(is_plain_symbol("BTC:USDT"));
        assert!(is_plain_symbol("btc/usd"));
        assert!(is_plain_symbol("BTC-PERP"));
        assert!(!is_plain_symbol("_LUNA"));
        assert!(!is_plain_symbol("B"));
        assert!(!is_plain_symbol("BTC.*"));
        assert!(!is_plain_symbol("USDT$"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(PairFilter::parse("BTCUSDT;*USDT").is_err());
        assert!(PairFilter::parse("(BTC").is_err());
    }

    #[test]
    fn select_keeps_order() {
        let filter = PairFilter::parse("USDT$").unwrap();
        let picked = filter.select(vec!["ETHUSDT".into(), "ETHBTC".into(), "BTCUSDT".into()]);
        assert_eq!(picked, vec!["ETHUSDT", "BTCUSDT"]);
    }
}
