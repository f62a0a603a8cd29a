//! Concurrent symbol -> order book directory.
//!
//! Lookups take the shared side of a reader/writer lock, so snapshot reads
//! never block each other; only symbol creation and removal serialize.
//! Books are handed out as `Arc`s: eviction removes the directory entry but
//! can never free a book out from under a reader or an in-flight mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::book::{BookSnapshot, OrderBook, DEFAULT_DEPTH, IMBALANCE_DEPTH};
use crate::event::{EventKind, MarketEvent};
use crate::types::{Price, Symbol};

/// Directory of active books, created on demand per symbol.
pub struct BookRegistry {
    books: RwLock<FxHashMap<Symbol, Arc<OrderBook>>>,
    total_updates: AtomicU64,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(FxHashMap::default()),
            total_updates: AtomicU64::new(0),
        }
    }

    /// Fetch the book for `symbol`, creating it on first touch.
    ///
    /// The fast path is a shared-read lookup. On a miss the exclusive lock
    /// is taken and the map re-checked, so concurrent first-touch events
    /// for a brand-new symbol still produce exactly one book.
    pub fn get_or_create(&self, symbol: Symbol) -> Arc<OrderBook> {
        if let Some(book) = self.books.read().get(&symbol) {
            return Arc::clone(book);
        }

        let mut books = self.books.write();
        let book = books
            .entry(symbol)
            .or_insert_with(|| {
                debug!(%symbol, "creating order book");
                Arc::new(OrderBook::new(symbol))
            });
        Arc::clone(book)
    }

    /// Look up a book without creating it.
    pub fn get(&self, symbol: &Symbol) -> Option<Arc<OrderBook>> {
        self.books.read().get(symbol).map(Arc::clone)
    }

    /// Remove a symbol explicitly. Returns true when it existed.
    pub fn remove(&self, symbol: &Symbol) -> bool {
        self.books.write().remove(symbol).is_some()
    }

    /// Active symbols, in no particular order.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.books.read().keys().copied().collect()
    }

    /// Number of active books.
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Total events dispatched through [`apply`](Self::apply).
    pub fn total_updates(&self) -> u64 {
        self.total_updates.load(Ordering::Relaxed)
    }

    /// Dispatch one event to its symbol's book, creating the book on
    /// demand.
    pub fn apply(&self, event: &MarketEvent) {
        let book = self.get_or_create(event.symbol);

        match &event.kind {
            EventKind::Trade(trade) => book.apply_trade(trade.price, trade.quantity),
            EventKind::Quote(quote) => book.apply_quote(
                quote.bid_price,
                quote.ask_price,
                quote.bid_size,
                quote.ask_size,
            ),
            EventKind::Level2 { bids, asks } => book.apply_level2(bids, asks),
            EventKind::Add {
                price,
                quantity,
                side,
            } => book.add(*price, *quantity, *side),
            EventKind::Modify {
                old_price,
                new_price,
                quantity,
                side,
            } => book.modify(*old_price, *new_price, *quantity, *side),
            EventKind::Delete {
                price,
                quantity,
                side,
            } => book.delete(*price, *quantity, *side),
        }

        self.total_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Evict books whose last trade or quote is older than `max_age`.
    ///
    /// Two-phase: candidates are collected under the shared lock, then
    /// removed under the exclusive lock, so the full scan never holds up
    /// lookups. Returns the number evicted.
    pub fn clear_stale(&self, max_age: Duration) -> usize {
        let stale: Vec<Symbol> = {
            let books = self.books.read();
            books
                .iter()
                .filter(|(_, book)| book.last_update().elapsed() > max_age)
                .map(|(symbol, _)| *symbol)
                .collect()
        };

        if stale.is_empty() {
            return 0;
        }

        let mut books = self.books.write();
        let mut evicted = 0;
        for symbol in &stale {
            if books.remove(symbol).is_some() {
                evicted += 1;
            }
        }
        drop(books);

        info!(evicted, "stale book sweep");
        evicted
    }

    /// Per-symbol market summary rows for egress reporters.
    pub fn market_summary(&self) -> Vec<SymbolSummary> {
        let books: Vec<Arc<OrderBook>> = self.books.read().values().map(Arc::clone).collect();

        books
            .iter()
            .map(|book| {
                let stats = book.stats();
                SymbolSummary {
                    symbol: book.symbol(),
                    best_bid: book.best_bid().map_or(0.0, Price::to_f64),
                    best_ask: book.best_ask().map_or(0.0, Price::to_f64),
                    mid_price: book.mid().map_or(0.0, Price::to_f64),
                    spread: book.spread().to_f64(),
                    imbalance: book.imbalance(IMBALANCE_DEPTH),
                    volume: stats.total_volume,
                    trade_count: stats.trade_count,
                    volatility: stats.volatility(),
                }
            })
            .collect()
    }

    /// Full snapshot of one book, if the symbol is active.
    pub fn snapshot(&self, symbol: &Symbol) -> Option<BookSnapshot> {
        self.get(symbol).map(|book| book.snapshot(DEFAULT_DEPTH))
    }
}

impl Default for BookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of the market summary.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SymbolSummary {
    pub symbol: Symbol,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid_price: f64,
    pub spread: f64,
    pub imbalance: f64,
    pub volume: u64,
    pub trade_count: u64,
    pub volatility: f64,
}
