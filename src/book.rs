//! Per-symbol price-level order book with lock-light top-of-book reads.
//!
//! The level ladders and the statistics block live behind one short-held
//! `RwLock`; exactly one logical writer (the aggregator) takes it for
//! writing. The best bid/ask pair is additionally published through atomics
//! with release ordering after every level change, so `best_bid`, `best_ask`,
//! `mid` and `spread` never touch the lock: readers see a coherent,
//! possibly-slightly-stale, never-torn value.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{BookStats, Price, PriceLevel, Quantity, Side, Symbol};

/// Depth used for snapshot ladders when the caller does not care.
pub const DEFAULT_DEPTH: usize = 10;

/// Depth over which the imbalance ratio is computed by convention.
pub const IMBALANCE_DEPTH: usize = 5;

type Ladder = BTreeMap<Price, PriceLevel>;

struct BookInner {
    /// Bid levels; best is the last (highest) key.
    bids: Ladder,
    /// Ask levels; best is the first (lowest) key.
    asks: Ladder,
    stats: BookStats,
}

/// A single symbol's book: sorted bid/ask ladders, cached best prices,
/// and running trade statistics.
pub struct OrderBook {
    symbol: Symbol,
    inner: RwLock<BookInner>,
    /// Raw price of the best bid; 0 when the side is empty.
    cached_best_bid: AtomicI64,
    /// Raw price of the best ask; 0 when the side is empty.
    cached_best_ask: AtomicI64,
    /// Mutations applied since creation.
    update_count: AtomicU64,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            inner: RwLock::new(BookInner {
                bids: Ladder::new(),
                asks: Ladder::new(),
                stats: BookStats::new(),
            }),
            cached_best_bid: AtomicI64::new(0),
            cached_best_ask: AtomicI64::new(0),
            update_count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    // ========================================================================
    // Mutations (single writer)
    // ========================================================================

    /// Merge resting quantity into a level, creating it on first touch.
    /// Non-positive price or zero quantity is silently ignored.
    pub fn add(&self, price: Price, quantity: Quantity, side: Side) {
        if !price.is_positive() || quantity == 0 {
            return;
        }

        let mut inner = self.inner.write();
        Self::merge_into_level(&mut inner, price, quantity, side);
        self.publish_best(&inner);
        drop(inner);
        self.update_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Move `quantity` from `old_price` to `new_price` on one side.
    ///
    /// Both steps run under a single write acquisition, so readers never
    /// observe the book between the decrement and the re-add.
    pub fn modify(&self, old_price: Price, new_price: Price, quantity: Quantity, side: Side) {
        if !new_price.is_positive() || quantity == 0 {
            return;
        }

        let mut inner = self.inner.write();
        Self::reduce_level(&mut inner, old_price, quantity, side);
        Self::merge_into_level(&mut inner, new_price, quantity, side);
        self.publish_best(&inner);
        drop(inner);
        self.update_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove resting quantity from a level; the level disappears when its
    /// quantity reaches zero.
    pub fn delete(&self, price: Price, quantity: Quantity, side: Side) {
        if !price.is_positive() || quantity == 0 {
            return;
        }

        let mut inner = self.inner.write();
        Self::reduce_level(&mut inner, price, quantity, side);
        self.publish_best(&inner);
        drop(inner);
        self.update_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a trade print into the statistics. A trade is a print, not a
    /// book mutation: price levels are untouched.
    pub fn apply_trade(&self, price: Price, quantity: Quantity) {
        if !price.is_positive() || quantity == 0 {
            return;
        }

        let mut inner = self.inner.write();
        inner.stats.update_trade(price, quantity);
        drop(inner);
        self.update_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace both ladders with a fresh top-of-book quote.
    pub fn apply_quote(
        &self,
        bid_price: Price,
        ask_price: Price,
        bid_size: Quantity,
        ask_size: Quantity,
    ) {
        let mut inner = self.inner.write();
        inner.bids.clear();
        inner.asks.clear();

        if bid_price.is_positive() && bid_size > 0 {
            inner
                .bids
                .insert(bid_price, PriceLevel::new(bid_price, bid_size));
        }
        if ask_price.is_positive() && ask_size > 0 {
            inner
                .asks
                .insert(ask_price, PriceLevel::new(ask_price, ask_size));
        }

        inner.stats.update_quote(bid_price, ask_price);
        self.publish_best(&inner);
        drop(inner);
        self.update_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace both ladders from a full depth snapshot. Zero-quantity
    /// entries are skipped so empty levels never persist.
    pub fn apply_level2(&self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        let mut inner = self.inner.write();
        inner.bids.clear();
        inner.asks.clear();

        for level in bids {
            if level.price.is_positive() && level.quantity > 0 {
                inner.bids.insert(level.price, *level);
            }
        }
        for level in asks {
            if level.price.is_positive() && level.quantity > 0 {
                inner.asks.insert(level.price, *level);
            }
        }

        self.publish_best(&inner);
        drop(inner);
        self.update_count.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Lock-free top-of-book reads
    // ========================================================================

    /// Best bid from the cached pair; never takes the lock.
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        let raw = self.cached_best_bid.load(Ordering::Acquire);
        (raw > 0).then(|| Price::from_raw(raw))
    }

    /// Best ask from the cached pair; never takes the lock.
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        let raw = self.cached_best_ask.load(Ordering::Acquire);
        (raw > 0).then(|| Price::from_raw(raw))
    }

    /// Midpoint of the cached pair; falls back to the last trade price
    /// when either side is empty.
    pub fn mid(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(Price::from_raw((bid.raw() + ask.raw()) / 2)),
            _ => {
                let last = self.inner.read().stats.last_price;
                last.is_positive().then_some(last)
            }
        }
    }

    /// `ask - bid` when both sides are populated, else zero.
    pub fn spread(&self) -> Price {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.saturating_sub(bid),
            _ => Price::ZERO,
        }
    }

    // ========================================================================
    // Analytics (shared read lock)
    // ========================================================================

    /// Normalized bid/ask volume difference over the top `depth` levels,
    /// in `[-1, 1]`. Zero when either side is empty at that depth.
    pub fn imbalance(&self, depth: usize) -> f64 {
        let inner = self.inner.read();

        let bid_volume: u64 = inner
            .bids
            .values()
            .rev()
            .take(depth)
            .map(|l| l.quantity)
            .sum();
        let ask_volume: u64 = inner.asks.values().take(depth).map(|l| l.quantity).sum();

        let total = bid_volume + ask_volume;
        if bid_volume == 0 || ask_volume == 0 || total == 0 {
            return 0.0;
        }

        (bid_volume as f64 - ask_volume as f64) / total as f64
    }

    /// Mid price weighted by the opposite side's resting size at the top
    /// level: heavier opposite size pulls the price toward the thinner side.
    pub fn weighted_mid(&self) -> f64 {
        let (bid, ask) = match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => (b, a),
            _ => return self.mid().map(Price::to_f64).unwrap_or(0.0),
        };

        let inner = self.inner.read();
        let bid_size = inner.bids.get(&bid).map_or(0, |l| l.quantity);
        let ask_size = inner.asks.get(&ask).map_or(0, |l| l.quantity);
        drop(inner);

        let total = bid_size + ask_size;
        if total == 0 {
            return self.mid().map(Price::to_f64).unwrap_or(0.0);
        }

        (bid.to_f64() * ask_size as f64 + ask.to_f64() * bid_size as f64) / total as f64
    }

    /// Annualized range volatility; zero for quote-only books.
    pub fn volatility(&self) -> f64 {
        self.inner.read().stats.volatility()
    }

    /// Top `depth` bid levels, best (highest) first.
    pub fn bids(&self, depth: usize) -> Vec<PriceLevel> {
        self.inner
            .read()
            .bids
            .values()
            .rev()
            .take(depth)
            .copied()
            .collect()
    }

    /// Top `depth` ask levels, best (lowest) first.
    pub fn asks(&self, depth: usize) -> Vec<PriceLevel> {
        self.inner
            .read()
            .asks
            .values()
            .take(depth)
            .copied()
            .collect()
    }

    /// Copy of the running statistics.
    pub fn stats(&self) -> BookStats {
        self.inner.read().stats
    }

    /// Time of the last trade or quote; the staleness sweep keys off this.
    pub fn last_update(&self) -> Instant {
        self.inner.read().stats.last_update
    }

    /// Mutations applied since creation.
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Relaxed)
    }

    /// Serializable snapshot for egress adapters, taken under a single
    /// read acquisition so the ladders and statistics are mutually
    /// consistent.
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let inner = self.inner.read();

        let bids: Vec<DepthLevel> = inner
            .bids
            .values()
            .rev()
            .take(depth)
            .map(DepthLevel::from)
            .collect();
        let asks: Vec<DepthLevel> = inner
            .asks
            .values()
            .take(depth)
            .map(DepthLevel::from)
            .collect();

        let best_bid = bids.first().map_or(0.0, |l| l.price);
        let best_ask = asks.first().map_or(0.0, |l| l.price);
        let stats = inner.stats;
        drop(inner);

        BookSnapshot {
            symbol: self.symbol,
            timestamp: Utc::now(),
            best_bid,
            best_ask,
            mid_price: self.mid().map(Price::to_f64).unwrap_or(0.0),
            spread: self.spread().to_f64(),
            weighted_mid: self.weighted_mid(),
            imbalance: self.imbalance(IMBALANCE_DEPTH),
            bids,
            asks,
            statistics: StatsView::from(&stats),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn side_ladder(inner: &mut BookInner, side: Side) -> &mut Ladder {
        match side {
            Side::Buy => &mut inner.bids,
            Side::Sell => &mut inner.asks,
        }
    }

    fn merge_into_level(inner: &mut BookInner, price: Price, quantity: Quantity, side: Side) {
        let level = Self::side_ladder(inner, side)
            .entry(price)
            .or_insert_with(|| PriceLevel::empty(price));
        level.quantity += quantity;
        level.order_count += 1;
    }

    fn reduce_level(inner: &mut BookInner, price: Price, quantity: Quantity, side: Side) {
        let ladder = Self::side_ladder(inner, side);
        // A decrement larger than the level holds is ignored, matching the
        // malformed-event policy at this boundary.
        let exhausted = match ladder.get_mut(&price) {
            Some(level) if level.quantity >= quantity => {
                level.quantity -= quantity;
                level.order_count = level.order_count.saturating_sub(1);
                level.quantity == 0
            }
            _ => false,
        };
        if exhausted {
            ladder.remove(&price);
        }
    }

    /// Recompute and publish the cached best prices. Release stores pair
    /// with the acquire loads in `best_bid`/`best_ask`, so a reader that
    /// observes a new best also observes the ladder writes that produced it
    /// on the next locked read.
    fn publish_best(&self, inner: &BookInner) {
        let best_bid = inner.bids.keys().next_back().map_or(0, |p| p.raw());
        let best_ask = inner.asks.keys().next().map_or(0, |p| p.raw());
        self.cached_best_bid.store(best_bid, Ordering::Release);
        self.cached_best_ask.store(best_ask, Ordering::Release);
    }
}

// ============================================================================
// Snapshot types
// ============================================================================

/// One ladder entry in egress form.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: u64,
    pub orders: u32,
}

impl From<&PriceLevel> for DepthLevel {
    fn from(level: &PriceLevel) -> Self {
        Self {
            price: level.price.to_f64(),
            quantity: level.quantity,
            orders: level.order_count,
        }
    }
}

/// Statistics in egress form.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct StatsView {
    pub last_price: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub vwap: f64,
    pub volume: u64,
    pub trade_count: u64,
    pub volatility: f64,
}

impl From<&BookStats> for StatsView {
    fn from(stats: &BookStats) -> Self {
        Self {
            last_price: stats.last_price.to_f64(),
            high: stats.high_price.to_f64(),
            low: stats.low_price.to_f64(),
            open: stats.open_price.to_f64(),
            vwap: stats.vwap.to_f64(),
            volume: stats.total_volume,
            trade_count: stats.trade_count,
            volatility: stats.volatility(),
        }
    }
}

/// Full serializable view of one book at a point in time.
#[derive(Clone, Debug, Serialize)]
pub struct BookSnapshot {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid_price: f64,
    pub spread: f64,
    pub weighted_mid: f64,
    pub imbalance: f64,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub statistics: StatsView,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OrderBook {
        OrderBook::new(Symbol::new("TEST"))
    }

    #[test]
    fn test_empty_book() {
        let book = book();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.mid(), None);
        assert_eq!(book.spread(), Price::ZERO);
        assert_eq!(book.imbalance(IMBALANCE_DEPTH), 0.0);
    }

    #[test]
    fn test_top_of_book() {
        let book = book();
        book.add(Price::from_f64(99.99), 10, Side::Buy);
        book.add(Price::from_f64(100.01), 10, Side::Sell);

        assert_eq!(book.best_bid(), Some(Price::from_f64(99.99)));
        assert_eq!(book.best_ask(), Some(Price::from_f64(100.01)));
        assert_eq!(book.spread(), Price::from_f64(0.02));
        assert_eq!(book.mid(), Some(Price::from_f64(100.00)));
    }

    #[test]
    fn test_add_merges_levels() {
        let book = book();
        let px = Price::from_f64(50.0);
        book.add(px, 100, Side::Buy);
        book.add(px, 250, Side::Buy);

        let bids = book.bids(DEFAULT_DEPTH);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].quantity, 350);
        assert_eq!(bids[0].order_count, 2);
    }

    #[test]
    fn test_best_prices_track_inserts() {
        let book = book();
        book.add(Price::from_f64(100.0), 10, Side::Buy);
        assert_eq!(book.best_bid(), Some(Price::from_f64(100.0)));

        // Higher bid becomes best
        book.add(Price::from_f64(100.5), 10, Side::Buy);
        assert_eq!(book.best_bid(), Some(Price::from_f64(100.5)));

        // Lower bid does not
        book.add(Price::from_f64(99.5), 10, Side::Buy);
        assert_eq!(book.best_bid(), Some(Price::from_f64(100.5)));

        book.add(Price::from_f64(101.0), 10, Side::Sell);
        book.add(Price::from_f64(100.8), 10, Side::Sell);
        assert_eq!(book.best_ask(), Some(Price::from_f64(100.8)));
    }

    #[test]
    fn test_delete_removes_exhausted_level() {
        let book = book();
        let px = Price::from_f64(75.0);
        book.add(px, 100, Side::Sell);
        book.delete(px, 40, Side::Sell);

        assert_eq!(book.asks(DEFAULT_DEPTH)[0].quantity, 60);

        book.delete(px, 60, Side::Sell);
        assert!(book.asks(DEFAULT_DEPTH).is_empty());
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_delete_recomputes_best() {
        let book = book();
        book.add(Price::from_f64(100.0), 10, Side::Buy);
        book.add(Price::from_f64(99.0), 20, Side::Buy);

        book.delete(Price::from_f64(100.0), 10, Side::Buy);
        assert_eq!(book.best_bid(), Some(Price::from_f64(99.0)));
    }

    #[test]
    fn test_oversized_delete_ignored() {
        let book = book();
        let px = Price::from_f64(75.0);
        book.add(px, 50, Side::Buy);
        book.delete(px, 51, Side::Buy);
        assert_eq!(book.bids(DEFAULT_DEPTH)[0].quantity, 50);
    }

    #[test]
    fn test_modify_moves_quantity() {
        let book = book();
        let old = Price::from_f64(100.0);
        let new = Price::from_f64(100.5);
        book.add(old, 100, Side::Buy);
        book.modify(old, new, 100, Side::Buy);

        let bids = book.bids(DEFAULT_DEPTH);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, new);
        assert_eq!(bids[0].quantity, 100);
        assert_eq!(book.best_bid(), Some(new));
    }

    #[test]
    fn test_malformed_mutations_ignored() {
        let book = book();
        book.add(Price::ZERO, 10, Side::Buy);
        book.add(Price::from_raw(-5), 10, Side::Buy);
        book.add(Price::from_f64(10.0), 0, Side::Buy);
        book.apply_trade(Price::ZERO, 10);
        book.apply_trade(Price::from_f64(10.0), 0);

        assert!(book.bids(DEFAULT_DEPTH).is_empty());
        assert_eq!(book.stats().trade_count, 0);
        assert_eq!(book.update_count(), 0);
    }

    #[test]
    fn test_trade_updates_stats_not_levels() {
        let book = book();
        book.add(Price::from_f64(99.0), 10, Side::Buy);
        book.apply_trade(Price::from_f64(100.00), 10);
        book.apply_trade(Price::from_f64(100.02), 5);

        let stats = book.stats();
        assert_eq!(stats.open_price, Price::from_f64(100.00));
        assert_eq!(stats.high_price, Price::from_f64(100.02));
        assert_eq!(stats.low_price, Price::from_f64(100.00));
        assert_eq!(stats.total_volume, 15);
        assert_eq!(stats.vwap.raw(), 1_000_066);

        // Levels untouched by prints
        assert_eq!(book.bids(DEFAULT_DEPTH).len(), 1);
        assert_eq!(book.best_bid(), Some(Price::from_f64(99.0)));
    }

    #[test]
    fn test_quote_replaces_ladders() {
        let book = book();
        book.add(Price::from_f64(99.0), 10, Side::Buy);
        book.add(Price::from_f64(101.0), 10, Side::Sell);

        book.apply_quote(Price::from_f64(99.5), Price::from_f64(100.5), 200, 300);

        assert_eq!(book.best_bid(), Some(Price::from_f64(99.5)));
        assert_eq!(book.best_ask(), Some(Price::from_f64(100.5)));
        assert_eq!(book.bids(DEFAULT_DEPTH).len(), 1);
        assert_eq!(book.asks(DEFAULT_DEPTH).len(), 1);
        assert_eq!(book.stats().bid_ask_spread, Price::from_f64(1.0));
    }

    #[test]
    fn test_level2_skips_zero_quantity() {
        let book = book();
        let bids = vec![
            PriceLevel::new(Price::from_f64(99.0), 100),
            PriceLevel {
                price: Price::from_f64(98.0),
                quantity: 0,
                order_count: 1,
            },
        ];
        let asks = vec![PriceLevel::new(Price::from_f64(101.0), 50)];
        book.apply_level2(&bids, &asks);

        assert_eq!(book.bids(DEFAULT_DEPTH).len(), 1);
        assert_eq!(book.asks(DEFAULT_DEPTH).len(), 1);
        assert_eq!(book.best_bid(), Some(Price::from_f64(99.0)));
    }

    #[test]
    fn test_imbalance_ratio() {
        let book = book();
        // Top-5 bid volume 30, ask volume 10
        book.add(Price::from_f64(99.0), 10, Side::Buy);
        book.add(Price::from_f64(98.0), 10, Side::Buy);
        book.add(Price::from_f64(97.0), 10, Side::Buy);
        book.add(Price::from_f64(101.0), 10, Side::Sell);

        assert_eq!(book.imbalance(IMBALANCE_DEPTH), 0.5);
    }

    #[test]
    fn test_imbalance_depth_window() {
        let book = book();
        for i in 0..8 {
            book.add(Price::from_f64(99.0 - i as f64), 10, Side::Buy);
        }
        book.add(Price::from_f64(101.0), 50, Side::Sell);

        // Only the top 5 bid levels count: 50 vs 50
        assert_eq!(book.imbalance(IMBALANCE_DEPTH), 0.0);
    }

    #[test]
    fn test_imbalance_empty_side_is_zero() {
        let book = book();
        book.add(Price::from_f64(99.0), 30, Side::Buy);
        assert_eq!(book.imbalance(IMBALANCE_DEPTH), 0.0);
    }

    #[test]
    fn test_weighted_mid_leans_toward_thin_side() {
        let book = book();
        book.add(Price::from_f64(99.99), 10, Side::Buy);
        book.add(Price::from_f64(100.01), 30, Side::Sell);

        // (99.99 * 30 + 100.01 * 10) / 40
        let expected = (99.99 * 30.0 + 100.01 * 10.0) / 40.0;
        assert!((book.weighted_mid() - expected).abs() < 1e-9);
        // Heavier ask size pulls the weighted mid below the plain mid
        assert!(book.weighted_mid() < book.mid().unwrap().to_f64());
    }

    #[test]
    fn test_mid_falls_back_to_last_trade() {
        let book = book();
        book.apply_trade(Price::from_f64(42.0), 5);
        assert_eq!(book.mid(), Some(Price::from_f64(42.0)));

        book.add(Price::from_f64(41.0), 10, Side::Buy);
        // Still one-sided: fallback remains
        assert_eq!(book.mid(), Some(Price::from_f64(42.0)));

        book.add(Price::from_f64(43.0), 10, Side::Sell);
        assert_eq!(book.mid(), Some(Price::from_f64(42.0)));
        assert_eq!(book.spread(), Price::from_f64(2.0));
    }

    #[test]
    fn test_snapshot_is_serializable() {
        let book = book();
        book.add(Price::from_f64(99.0), 10, Side::Buy);
        book.add(Price::from_f64(101.0), 10, Side::Sell);
        book.apply_trade(Price::from_f64(100.0), 5);

        let snapshot = book.snapshot(DEFAULT_DEPTH);
        assert_eq!(snapshot.best_bid, 99.0);
        assert_eq!(snapshot.best_ask, 101.0);
        assert_eq!(snapshot.statistics.volume, 5);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"symbol\":\"TEST\""));
        assert!(json.contains("\"best_bid\":99.0"));
    }

    #[test]
    fn test_update_count_tracks_mutations() {
        let book = book();
        book.add(Price::from_f64(10.0), 1, Side::Buy);
        book.apply_trade(Price::from_f64(10.0), 1);
        book.delete(Price::from_f64(10.0), 1, Side::Buy);
        assert_eq!(book.update_count(), 3);
    }
}
