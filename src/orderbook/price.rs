use ordered_float::OrderedFloat;
use std::fmt;

/// Number of fractional digits kept from `log2(price)`.
pub const ROUNDED_DIGITS: i32 = 8;

/// Canonical bucket for a price.
///
/// Prices coming from the diff stream and from REST snapshots are parsed
/// independently, so the same level can show up with slightly different
/// floating-point representations. Keying levels by a truncated `log2(price)`
/// makes those representations collide into the same bucket while keeping a
/// total numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceKey(OrderedFloat<f64>);

impl PriceKey {
    /// Lower bound of every key, used for open-ended ranges.
    pub const MIN: PriceKey = PriceKey(OrderedFloat(f64::MIN));
    /// Upper bound of every key, used for open-ended ranges.
    pub const MAX: PriceKey = PriceKey(OrderedFloat(f64::MAX));

    /// Returns `None` for prices that have no logarithm (zero, negative, NaN, inf).
    pub fn from_price(price: f64) -> Option<Self> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }

        let scale = 10f64.powi(ROUNDED_DIGITS);
        // truncation toward zero; `+ 0.0` folds -0.0 into 0.0
        let value = (price.log2() * scale).trunc() / scale + 0.0;
        Some(Self(OrderedFloat(value)))
    }

    /// The rounded log2 value backing this key.
    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }

    /// `2^key`, the price this bucket stands for.
    pub fn rounded_price(&self) -> f64 {
        2f64.powf(self.value())
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}", self.value())
    }
}
