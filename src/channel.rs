//! Bounded, non-blocking event channel between ingress and the aggregator.
//!
//! A thin wrapper over the SPSC ring sized for steady-state event rates.
//! Overload sheds load visibly: a full ring increments the drop counter and
//! the enqueue reports failure, so producers never block and never unwind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::MarketEvent;
use crate::ring::{self, SpscConsumer, SpscProducer};

/// Default channel capacity; sized for tens of thousands of in-flight events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 131_072;

/// Drop accounting shared by both ends of a channel.
#[derive(Debug, Default)]
struct ChannelStats {
    dropped: AtomicU64,
}

/// Producing end of an event channel.
pub struct EventSender {
    tx: SpscProducer<MarketEvent>,
    stats: Arc<ChannelStats>,
}

/// Consuming end of an event channel.
pub struct EventReceiver {
    rx: SpscConsumer<MarketEvent>,
    stats: Arc<ChannelStats>,
}

/// Create a bounded event channel with the given ring capacity
/// (power of two; see [`ring::spsc`]).
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = ring::spsc(capacity);
    let stats = Arc::new(ChannelStats::default());
    (
        EventSender {
            tx,
            stats: Arc::clone(&stats),
        },
        EventReceiver { rx, stats },
    )
}

/// Create a channel with [`DEFAULT_CHANNEL_CAPACITY`].
pub fn default_event_channel() -> (EventSender, EventReceiver) {
    event_channel(DEFAULT_CHANNEL_CAPACITY)
}

impl EventSender {
    /// Enqueue one event. Never blocks; on a full ring the event is
    /// discarded, the drop counter is incremented, and `false` is returned.
    #[inline]
    pub fn enqueue(&mut self, event: MarketEvent) -> bool {
        match self.tx.try_push(event) {
            Ok(()) => true,
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Events discarded because the ring was full.
    pub fn dropped_count(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Fill ratio of the underlying ring; advisory.
    pub fn utilization(&self) -> f64 {
        self.tx.utilization()
    }
}

impl EventReceiver {
    /// Dequeue one event, if any.
    #[inline]
    pub fn dequeue(&mut self) -> Option<MarketEvent> {
        self.rx.try_pop()
    }

    /// Drain up to `max` events into `out`, amortizing per-event overhead.
    /// Returns the number appended.
    pub fn dequeue_batch(&mut self, out: &mut Vec<MarketEvent>, max: usize) -> usize {
        let mut count = 0;
        while count < max {
            match self.rx.try_pop() {
                Some(event) => {
                    out.push(event);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// True when no events are queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Queued event count; advisory.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Events discarded by the sender because the ring was full.
    pub fn dropped_count(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Fill ratio of the underlying ring; advisory.
    pub fn utilization(&self) -> f64 {
        self.rx.utilization()
    }
}
