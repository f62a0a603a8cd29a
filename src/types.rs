//! Core market data primitives.
//!
//! Prices are fixed-point integers so that price levels can be used as exact
//! map keys; symbols are fixed-width inline strings that are copied by value.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use arrayvec::ArrayString;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resting or traded size.
pub type Quantity = u64;

/// Maximum symbol length in bytes.
pub const SYMBOL_LEN: usize = 16;

/// Fixed-point price scale: 4 implied decimal places.
pub const PRICE_SCALE: i64 = 10_000;

/// Annualization factor for the volatility estimator (trading days).
pub(crate) const TRADING_PERIODS: f64 = 252.0;

// ============================================================================
// Price
// ============================================================================

/// A fixed-point price (scaled by [`PRICE_SCALE`]).
///
/// Using a scaled integer instead of a float keeps level keys exact:
/// `$100.50` is stored as `1_005_000` and compares without rounding error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(i64);

impl Price {
    /// A zero price, used as the "absent" sentinel in cached fields.
    pub const ZERO: Price = Price(0);

    /// Construct from a raw scaled integer.
    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Price(raw)
    }

    /// The raw scaled integer.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Convert from a float, rounding to the nearest tick.
    #[inline]
    pub fn from_f64(value: f64) -> Self {
        Price((value * PRICE_SCALE as f64).round() as i64)
    }

    /// Convert to a float for display and analytics.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / PRICE_SCALE as f64
    }

    /// Exact conversion from a decimal, for ingress adapters that parse
    /// text protocols. Returns `None` when the value does not fit.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        (value * Decimal::from(PRICE_SCALE)).to_i64().map(Price)
    }

    /// True for prices a book mutation will accept.
    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn saturating_add(self, rhs: Price) -> Price {
        Price(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub const fn saturating_sub(self, rhs: Price) -> Price {
        Price(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

/// Error parsing a decimal price string.
#[derive(Debug, Error)]
#[error("invalid price literal: {0:?}")]
pub struct ParsePriceError(String);

impl FromStr for Price {
    type Err = ParsePriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s).map_err(|_| ParsePriceError(s.to_owned()))?;
        Price::from_decimal(decimal).ok_or_else(|| ParsePriceError(s.to_owned()))
    }
}

// ============================================================================
// Symbol
// ============================================================================

/// A fixed-width instrument identifier.
///
/// Stored inline (no heap) so events and map keys copy by value. Longer
/// input is truncated to [`SYMBOL_LEN`] bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(ArrayString<SYMBOL_LEN>);

impl Symbol {
    /// Create a symbol, truncating to the fixed width.
    pub fn new(name: &str) -> Self {
        let mut buf = ArrayString::new();
        for ch in name.chars() {
            if buf.try_push(ch).is_err() {
                break;
            }
        }
        Symbol(buf)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

// ============================================================================
// Side
// ============================================================================

/// Aggressor or resting side of the market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Buy = 0,
    /// Sell side (asks)
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

// ============================================================================
// Price Level
// ============================================================================

/// Aggregated resting liquidity at one price on one side of a book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price (unique per side)
    pub price: Price,
    /// Total quantity resting at this price
    pub quantity: Quantity,
    /// Number of orders aggregated into this level
    pub order_count: u32,
}

impl PriceLevel {
    /// Create a single-order level.
    #[inline]
    pub const fn new(price: Price, quantity: Quantity) -> Self {
        Self {
            price,
            quantity,
            order_count: 1,
        }
    }

    /// Create an empty level at a price, ready to merge orders into.
    #[inline]
    pub const fn empty(price: Price) -> Self {
        Self {
            price,
            quantity: 0,
            order_count: 0,
        }
    }
}

// ============================================================================
// Book Statistics
// ============================================================================

/// Running per-symbol trade statistics.
///
/// Mutated only under the owning book's write lock; `vwap` is maintained
/// incrementally from the cumulative notional, never recomputed from history.
#[derive(Clone, Copy, Debug)]
pub struct BookStats {
    /// Last trade price
    pub last_price: Price,
    /// Session high trade price
    pub high_price: Price,
    /// Session low trade price
    pub low_price: Price,
    /// First trade price of the session
    pub open_price: Price,
    /// Volume-weighted average price
    pub vwap: Price,
    /// Cumulative traded volume
    pub total_volume: Quantity,
    /// Number of trade prints applied
    pub trade_count: u64,
    /// Spread from the most recent quote
    pub bid_ask_spread: Price,
    /// Time of the last trade or quote; drives the staleness sweep
    pub last_update: Instant,
}

impl BookStats {
    pub fn new() -> Self {
        Self {
            last_price: Price::ZERO,
            high_price: Price::ZERO,
            low_price: Price::ZERO,
            open_price: Price::ZERO,
            vwap: Price::ZERO,
            total_volume: 0,
            trade_count: 0,
            bid_ask_spread: Price::ZERO,
            last_update: Instant::now(),
        }
    }

    /// Fold one trade print into the running statistics.
    pub fn update_trade(&mut self, price: Price, quantity: Quantity) {
        self.last_update = Instant::now();
        self.last_price = price;

        if self.trade_count == 0 {
            self.open_price = price;
            self.high_price = price;
            self.low_price = price;
        } else {
            self.high_price = self.high_price.max(price);
            self.low_price = self.low_price.min(price);
        }

        // vwap' = (vwap * volume + price * qty) / (volume + qty), in raw ticks
        let old_notional = self.vwap.raw() as i128 * self.total_volume as i128;
        let trade_notional = price.raw() as i128 * quantity as i128;

        self.total_volume += quantity;
        self.trade_count += 1;

        if self.total_volume > 0 {
            let vwap = (old_notional + trade_notional) / self.total_volume as i128;
            self.vwap = Price::from_raw(vwap as i64);
        }
    }

    /// Record the spread from a fresh quote.
    pub fn update_quote(&mut self, bid: Price, ask: Price) {
        self.last_update = Instant::now();
        self.bid_ask_spread = ask.saturating_sub(bid);
    }

    /// Parkinson-style volatility from the intraday high/low range,
    /// annualized. Zero with fewer than two trades or a zero range.
    pub fn volatility(&self) -> f64 {
        if self.trade_count < 2 || self.high_price == self.low_price {
            return 0.0;
        }

        let range = self.high_price.saturating_sub(self.low_price).to_f64();
        let mid_range = (self.high_price.raw() + self.low_price.raw()) / 2;
        let mid_range = Price::from_raw(mid_range).to_f64();

        if mid_range == 0.0 {
            return 0.0;
        }

        (range / mid_range) * TRADING_PERIODS.sqrt()
    }
}

impl Default for BookStats {
    fn default() -> Self {
        Self::new()
    }
}
