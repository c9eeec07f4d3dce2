use crate::orderbook::Orderbook;
use dashmap::DashMap;
use std::sync::Arc;

/// Books keyed by symbol, created on first touch and kept for the lifetime
/// of the registry.
#[derive(Clone, Default)]
pub struct SymbolBookRegistry {
    inner: Arc<DashMap<String, Arc<Orderbook>>>,
}

impl SymbolBookRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Returns the book for `symbol`, creating an empty one if needed.
    pub fn get_or_create(&self, symbol: &str) -> Arc<Orderbook> {
        if let Some(book) = self.inner.get(symbol) {
            return book.value().clone();
        }
        self.inner
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Orderbook::new()))
            .value()
            .clone()
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<Orderbook>> {
        self.inner.get(symbol).map(|r| r.value().clone())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.inner.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Symbols currently tracked, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.inner.iter().map(|r| r.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Every book with its symbol. The map guards are released before
    /// returning, so callers may hold the books across awaits.
    pub fn all(&self) -> Vec<(String, Arc<Orderbook>)> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_touch_creates_then_reuses() {
        let registry = SymbolBookRegistry::new();
        assert!(registry.get("BTCUSDT").is_none());

        let a = registry.get_or_create("BTCUSDT");
        let b = registry.get_or_create("BTCUSDT");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clones_share_the_same_books() {
        let registry = SymbolBookRegistry::new();
        let other = registry.clone();
        registry.get_or_create("ETHUSDT");
        assert!(other.contains("ETHUSDT"));
        assert_eq!(other.symbols(), vec!["ETHUSDT".to_string()]);
    }
}
