//! # Flash-Feed
//!
//! A lock-free, multi-symbol market data feed handler.
//!
//! ## Design Principles
//!
//! - **Single-Writer Books**: one aggregator thread owns all book mutation
//! - **Non-Blocking Ingest**: try-based ring buffers, drops counted not thrown
//! - **Lock-Light Reads**: top-of-book served from release/acquire atomics
//! - **Cache-Aware Layout**: ring indices padded onto separate cache lines
//!
//! ## Architecture
//!
//! ```text
//! [Producer Thread(s)] --> [Event Channel (SPSC ring)] --> [Aggregator Thread]
//!                                                                 |
//!                                                    [Registry -> OrderBooks]
//!                                                                 ^
//!                                             [Reader Threads (snapshots)]
//! ```

pub mod aggregator;
pub mod book;
pub mod channel;
pub mod event;
pub mod registry;
pub mod ring;
pub mod sim;
pub mod types;

// Re-exports for convenience
pub use aggregator::{Aggregator, AggregatorError, ProcessingMetrics};
pub use book::{BookSnapshot, DepthLevel, OrderBook, StatsView, DEFAULT_DEPTH, IMBALANCE_DEPTH};
pub use channel::{default_event_channel, event_channel, EventReceiver, EventSender};
pub use event::{EventKind, MarketEvent, Quote, Trade};
pub use registry::{BookRegistry, SymbolSummary};
pub use ring::{MpscConsumer, MpscProducer, SpscConsumer, SpscProducer};
pub use sim::{MarketSimulator, SimConfig, SymbolConfig};
pub use types::{BookStats, Price, PriceLevel, Quantity, Side, Symbol, PRICE_SCALE};
