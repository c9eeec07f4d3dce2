use super::price::PriceKey;
use serde::Serialize;

/// Online mean/variance of the quantities applied to a level (Welford).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    #[serde(skip)]
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Population variance, 0 below two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single price on one side of a book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceLevel {
    price: f64,
    pub quantity: f64,
    /// Sequence id (exchange update id) of the last write.
    pub last_applied_seq: i64,
    /// Writes since the last statistics reset.
    pub change_counter: i32,
    /// Event time of the last write, unix millis.
    pub updated_ms: u64,
    pub stats: Option<RunningStats>,
}

impl PriceLevel {
    /// A level as first seen; the creating write counts as a change.
    pub(crate) fn new(price: f64, quantity: f64, time_ms: u64, seq: i64) -> Self {
        let mut level = Self {
            price,
            quantity: 0.0,
            last_applied_seq: i64::MIN,
            change_counter: 0,
            updated_ms: time_ms,
            stats: None,
        };
        level.update(quantity, time_ms, seq);
        level
    }

    /// Stand-in for a level that vanished between view capture and read.
    ///
    /// Views yield this instead of failing: a missing key simply means the
    /// level is gone, which is what a zero quantity says too.
    pub fn placeholder(key: PriceKey, now_ms: u64) -> Self {
        Self {
            price: key.rounded_price(),
            quantity: 0.0,
            last_applied_seq: i64::MIN,
            change_counter: 0,
            updated_ms: now_ms,
            stats: None,
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// In-place write. Callers must have filtered out older sequence ids.
    pub(crate) fn update(&mut self, quantity: f64, time_ms: u64, seq: i64) {
        debug_assert!(
            seq >= self.last_applied_seq,
            "level at {} moved back from seq {} to {}",
            self.price,
            self.last_applied_seq,
            seq
        );

        self.last_applied_seq = seq;
        self.updated_ms = time_ms;
        self.quantity = quantity;
        self.change_counter += 1;
        self.stats.get_or_insert_with(RunningStats::new).push(quantity);
    }

    pub(crate) fn reset_statistics(&mut self) {
        self.change_counter = 0;
        self.stats = None;
    }
}
