//! Synthetic market data source.
//!
//! Drives the pipeline without an exchange connection: geometric Brownian
//! motion price paths per symbol, log-normal trade and quote sizes, and a
//! configurable trade/quote mix. Fully deterministic under a seeded RNG,
//! which is what the tests and benchmarks rely on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use thiserror::Error;
use tracing::info;

use crate::channel::EventSender;
use crate::event::{EventKind, MarketEvent, Quote, Trade};
use crate::types::{Price, Quantity, Side, Symbol};

/// One second of GBM time, as a fraction of a year.
const GBM_DT: f64 = 1.0 / (365.0 * 24.0 * 3600.0);

/// Log-normal parameters for trade sizes (mean ~400 shares).
const TRADE_SIZE_MU: f64 = 6.0;
const TRADE_SIZE_SIGMA: f64 = 1.5;

/// Log-normal parameters for quote sizes (mean ~1100 shares).
const QUOTE_SIZE_MU: f64 = 7.0;
const QUOTE_SIZE_SIGMA: f64 = 1.0;

/// Invalid simulator configuration.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("symbol {0}: volatility must be finite and non-negative")]
    BadVolatility(Symbol),
    #[error("no symbols configured")]
    NoSymbols,
}

/// Per-symbol simulation parameters.
#[derive(Clone, Debug)]
pub struct SymbolConfig {
    pub symbol: Symbol,
    pub initial_price: Price,
    /// Annualized volatility of the price path.
    pub volatility: f64,
}

impl SymbolConfig {
    pub fn new(symbol: &str, initial_price: f64, volatility: f64) -> Self {
        Self {
            symbol: Symbol::new(symbol),
            initial_price: Price::from_f64(initial_price),
            volatility,
        }
    }
}

/// Simulator configuration.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub symbols: Vec<SymbolConfig>,
    /// Probability that a generated event is a trade (the rest are quotes).
    pub trade_probability: f64,
}

impl Default for SimConfig {
    /// A familiar mix: large-cap tech, financials, and two crypto pairs
    /// with much higher volatility.
    fn default() -> Self {
        Self {
            symbols: vec![
                SymbolConfig::new("AAPL", 150.25, 0.025),
                SymbolConfig::new("GOOGL", 2800.50, 0.030),
                SymbolConfig::new("MSFT", 320.75, 0.022),
                SymbolConfig::new("TSLA", 800.00, 0.045),
                SymbolConfig::new("NVDA", 450.30, 0.040),
                SymbolConfig::new("JPM", 145.80, 0.028),
                SymbolConfig::new("BAC", 35.60, 0.032),
                SymbolConfig::new("GS", 380.25, 0.035),
                SymbolConfig::new("BTCUSD", 45000.00, 0.08),
                SymbolConfig::new("ETHUSD", 3200.00, 0.10),
            ],
            trade_probability: 0.3,
        }
    }
}

struct SymbolState {
    symbol: Symbol,
    current_price: Price,
    drift: f64,
    step_dist: Normal<f64>,
}

/// Multi-symbol synthetic event generator.
pub struct MarketSimulator<R: Rng> {
    states: Vec<SymbolState>,
    rng: R,
    trade_probability: f64,
    trade_size_dist: LogNormal<f64>,
    quote_size_dist: LogNormal<f64>,
    next_symbol: usize,
    sequence: u64,
    trades_generated: u64,
    quotes_generated: u64,
}

impl<R: Rng> MarketSimulator<R> {
    pub fn new(config: SimConfig, rng: R) -> Result<Self, SimError> {
        if config.symbols.is_empty() {
            return Err(SimError::NoSymbols);
        }

        let states = config
            .symbols
            .iter()
            .map(|cfg| {
                let step_dist = Normal::new(0.0, cfg.volatility)
                    .map_err(|_| SimError::BadVolatility(cfg.symbol))?;
                Ok(SymbolState {
                    symbol: cfg.symbol,
                    current_price: cfg.initial_price,
                    drift: 0.0001,
                    step_dist,
                })
            })
            .collect::<Result<Vec<_>, SimError>>()?;

        Ok(Self {
            states,
            rng,
            trade_probability: config.trade_probability,
            // Parameters are compile-time constants; construction cannot fail.
            trade_size_dist: LogNormal::new(TRADE_SIZE_MU, TRADE_SIZE_SIGMA)
                .expect("constant log-normal parameters"),
            quote_size_dist: LogNormal::new(QUOTE_SIZE_MU, QUOTE_SIZE_SIGMA)
                .expect("constant log-normal parameters"),
            next_symbol: 0,
            sequence: 0,
            trades_generated: 0,
            quotes_generated: 0,
        })
    }

    /// Generate the next event, cycling through the configured symbols.
    pub fn next_event(&mut self) -> MarketEvent {
        let index = self.next_symbol;
        self.next_symbol = (self.next_symbol + 1) % self.states.len();

        let sequence = self.sequence;
        self.sequence += 1;

        let is_trade = self.rng.gen_bool(self.trade_probability);
        if is_trade {
            self.generate_trade(index, sequence)
        } else {
            self.generate_quote(index, sequence)
        }
    }

    /// Push `count` events into the channel. Returns how many were accepted;
    /// the channel accounts for the drops.
    pub fn pump(&mut self, sender: &mut EventSender, count: usize) -> usize {
        let mut accepted = 0;
        for _ in 0..count {
            let event = self.next_event();
            if sender.enqueue(event) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Generate events until `shutdown` is set, pausing `pace` between
    /// per-symbol sweeps to control the message rate.
    pub fn run(&mut self, sender: &mut EventSender, shutdown: &AtomicBool, pace: Duration) {
        let symbols = self.states.len();
        while !shutdown.load(Ordering::Acquire) {
            self.pump(sender, symbols);
            std::thread::sleep(pace);
        }
        info!(
            trades = self.trades_generated,
            quotes = self.quotes_generated,
            dropped = sender.dropped_count(),
            "simulator finished"
        );
    }

    pub fn events_generated(&self) -> u64 {
        self.sequence
    }

    pub fn trades_generated(&self) -> u64 {
        self.trades_generated
    }

    pub fn quotes_generated(&self) -> u64 {
        self.quotes_generated
    }

    fn generate_trade(&mut self, index: usize, sequence: u64) -> MarketEvent {
        let state = &mut self.states[index];

        // One GBM step per trade
        let step = state.step_dist.sample(&mut self.rng);
        let change = state.drift * GBM_DT + GBM_DT.sqrt() * step;
        let moved = state.current_price.to_f64() * (1.0 + change);
        state.current_price = Price::from_raw(Price::from_f64(moved).raw().max(1));

        let size = self.trade_size_dist.sample(&mut self.rng).max(1.0) as Quantity;
        let side = if self.rng.gen_bool(0.5) {
            Side::Buy
        } else {
            Side::Sell
        };

        self.trades_generated += 1;
        MarketEvent::new(
            sequence,
            state.symbol,
            EventKind::Trade(Trade {
                price: state.current_price,
                quantity: size,
                side,
                trade_id: self.trades_generated,
            }),
        )
    }

    fn generate_quote(&mut self, index: usize, sequence: u64) -> MarketEvent {
        let state = &self.states[index];
        let price = state.current_price.to_f64();

        // Spread between 1 and 10 basis points of the current price
        let spread = price * self.rng.gen_range(0.0001..0.001);
        let half_spread = spread / 2.0;

        let bid_size = self.quote_size_dist.sample(&mut self.rng).max(100.0) as Quantity;
        let ask_size = self.quote_size_dist.sample(&mut self.rng).max(100.0) as Quantity;

        self.quotes_generated += 1;
        MarketEvent::new(
            sequence,
            state.symbol,
            EventKind::Quote(Quote {
                bid_price: Price::from_f64(price - half_spread),
                ask_price: Price::from_f64(price + half_spread),
                bid_size,
                ask_size,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sim(seed: u64, trade_probability: f64) -> MarketSimulator<ChaCha8Rng> {
        let config = SimConfig {
            trade_probability,
            ..SimConfig::default()
        };
        MarketSimulator::new(config, ChaCha8Rng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let mut a = sim(7, 0.3);
        let mut b = sim(7, 0.3);

        for _ in 0..500 {
            let ea = a.next_event();
            let eb = b.next_event();
            assert_eq!(ea.sequence, eb.sequence);
            assert_eq!(ea.symbol, eb.symbol);
            match (&ea.kind, &eb.kind) {
                (EventKind::Trade(ta), EventKind::Trade(tb)) => {
                    assert_eq!(ta.price, tb.price);
                    assert_eq!(ta.quantity, tb.quantity);
                    assert_eq!(ta.side, tb.side);
                }
                (EventKind::Quote(qa), EventKind::Quote(qb)) => {
                    assert_eq!(qa.bid_price, qb.bid_price);
                    assert_eq!(qa.ask_price, qb.ask_price);
                }
                _ => panic!("event kinds diverged"),
            }
        }
    }

    #[test]
    fn test_prices_stay_positive() {
        let mut sim = sim(42, 1.0);
        for _ in 0..10_000 {
            match sim.next_event().kind {
                EventKind::Trade(trade) => assert!(trade.price.is_positive()),
                _ => unreachable!("trade_probability is 1.0"),
            }
        }
    }

    #[test]
    fn test_trade_probability_extremes() {
        let mut trades_only = sim(1, 1.0);
        for _ in 0..100 {
            assert!(matches!(trades_only.next_event().kind, EventKind::Trade(_)));
        }
        assert_eq!(trades_only.trades_generated(), 100);

        let mut quotes_only = sim(1, 0.0);
        for _ in 0..100 {
            assert!(matches!(quotes_only.next_event().kind, EventKind::Quote(_)));
        }
        assert_eq!(quotes_only.quotes_generated(), 100);
    }

    #[test]
    fn test_quotes_are_well_formed() {
        let mut sim = sim(3, 0.0);
        for _ in 0..1_000 {
            match sim.next_event().kind {
                EventKind::Quote(quote) => {
                    assert!(quote.bid_price.is_positive());
                    assert!(quote.ask_price > quote.bid_price);
                    assert!(quote.bid_size >= 100);
                    assert!(quote.ask_size >= 100);
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn test_round_robin_covers_all_symbols() {
        let mut sim = sim(5, 0.5);
        let symbols = SimConfig::default().symbols.len();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..symbols {
            seen.insert(sim.next_event().symbol);
        }
        assert_eq!(seen.len(), symbols);
    }

    #[test]
    fn test_empty_config_rejected() {
        let config = SimConfig {
            symbols: vec![],
            trade_probability: 0.3,
        };
        assert!(matches!(
            MarketSimulator::new(config, ChaCha8Rng::seed_from_u64(0)),
            Err(SimError::NoSymbols)
        ));
    }
}
