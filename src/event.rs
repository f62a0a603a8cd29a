//! Market event types flowing through the ingestion pipeline.
//!
//! Ingress adapters (feed decoders, the simulator) construct these;
//! the aggregator consumes them and dispatches to the per-symbol books.

use std::time::Instant;

use crate::types::{Price, PriceLevel, Quantity, Side, Symbol};

/// A trade print: an execution report, not a book mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trade {
    /// Execution price
    pub price: Price,
    /// Executed quantity
    pub quantity: Quantity,
    /// Aggressor side
    pub side: Side,
    /// Exchange-assigned trade identifier
    pub trade_id: u64,
}

/// A top-of-book quote refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quote {
    pub bid_price: Price,
    pub ask_price: Price,
    pub bid_size: Quantity,
    pub ask_size: Quantity,
}

/// The payload of a market event.
#[derive(Clone, Debug)]
pub enum EventKind {
    /// Trade print; updates statistics only
    Trade(Trade),
    /// Top-of-book refresh; replaces both ladders
    Quote(Quote),
    /// Full depth snapshot; replaces both ladders
    Level2 {
        /// Bid levels, best first
        bids: Vec<PriceLevel>,
        /// Ask levels, best first
        asks: Vec<PriceLevel>,
    },
    /// Merge resting quantity into a level
    Add {
        price: Price,
        quantity: Quantity,
        side: Side,
    },
    /// Move resting quantity between price levels
    Modify {
        old_price: Price,
        new_price: Price,
        quantity: Quantity,
        side: Side,
    },
    /// Remove resting quantity from a level
    Delete {
        price: Price,
        quantity: Quantity,
        side: Side,
    },
}

/// One event as it travels through the channel.
///
/// `received_at` is stamped when the event enters the process; the
/// aggregator measures its processing latency against it.
#[derive(Clone, Debug)]
pub struct MarketEvent {
    /// Producer-assigned sequence number
    pub sequence: u64,
    /// Ingress timestamp for latency accounting
    pub received_at: Instant,
    /// Instrument this event belongs to
    pub symbol: Symbol,
    /// Event payload
    pub kind: EventKind,
}

impl MarketEvent {
    /// Construct an event stamped with the current time.
    pub fn new(sequence: u64, symbol: Symbol, kind: EventKind) -> Self {
        Self {
            sequence,
            received_at: Instant::now(),
            symbol,
            kind,
        }
    }

    /// Convenience constructor for a trade print.
    pub fn trade(sequence: u64, symbol: Symbol, trade: Trade) -> Self {
        Self::new(sequence, symbol, EventKind::Trade(trade))
    }

    /// Convenience constructor for a quote refresh.
    pub fn quote(sequence: u64, symbol: Symbol, quote: Quote) -> Self {
        Self::new(sequence, symbol, EventKind::Quote(quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_event_construction() {
        let event = MarketEvent::trade(
            7,
            Symbol::new("AAPL"),
            Trade {
                price: Price::from_f64(150.25),
                quantity: 100,
                side: Side::Buy,
                trade_id: 42,
            },
        );

        assert_eq!(event.sequence, 7);
        assert_eq!(event.symbol.as_str(), "AAPL");
        match event.kind {
            EventKind::Trade(t) => {
                assert_eq!(t.price, Price::from_f64(150.25));
                assert_eq!(t.quantity, 100);
            }
            _ => panic!("expected Trade"),
        }
    }

    #[test]
    fn test_received_at_is_fresh() {
        let event = MarketEvent::quote(
            1,
            Symbol::new("MSFT"),
            Quote {
                bid_price: Price::from_f64(320.70),
                ask_price: Price::from_f64(320.80),
                bid_size: 500,
                ask_size: 300,
            },
        );
        assert!(event.received_at.elapsed().as_secs() < 1);
    }
}
