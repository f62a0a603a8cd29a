//! Aggregator - the single consumer thread behind the event channel.
//!
//! Drains events in batches, dispatches them through the registry, and
//! tracks processing latency. The processing thread is the only writer any
//! order book ever sees; everything else reads.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::channel::EventReceiver;
use crate::registry::BookRegistry;

/// Events drained per wakeup; amortizes per-event overhead.
const BATCH_SIZE: usize = 256;

/// Bounded idle wait when the channel is empty. Trades a little latency
/// for not burning a core on an idle feed.
const IDLE_WAIT: Duration = Duration::from_micros(50);

/// Failure starting the aggregator.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("failed to spawn processing thread")]
    Spawn(#[from] io::Error),
}

// ============================================================================
// Metrics
// ============================================================================

/// Processing counters, readable from any thread while the loop runs.
#[derive(Debug, Default)]
pub struct ProcessingMetrics {
    events_processed: AtomicU64,
    batches: AtomicU64,
    avg_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

impl ProcessingMetrics {
    /// Fold one latency sample into the exponentially-smoothed average
    /// (alpha = 1/16) and the monotonic max.
    pub fn record_latency(&self, latency_ns: u64) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);

        let current_avg = self.avg_latency_ns.load(Ordering::Relaxed);
        let new_avg = (current_avg * 15 + latency_ns) / 16;
        self.avg_latency_ns.store(new_avg, Ordering::Relaxed);

        // CAS retry keeps the max monotonically non-decreasing under the
        // (unused here, but allowed) multi-recorder case.
        let mut current_max = self.max_latency_ns.load(Ordering::Relaxed);
        while latency_ns > current_max {
            match self.max_latency_ns.compare_exchange_weak(
                current_max,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_max = observed,
            }
        }
    }

    fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ns(&self) -> u64 {
        self.avg_latency_ns.load(Ordering::Relaxed)
    }

    pub fn max_latency_ns(&self) -> u64 {
        self.max_latency_ns.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Owns the processing thread that moves events from the channel into
/// the registry's books.
pub struct Aggregator {
    registry: Arc<BookRegistry>,
    metrics: Arc<ProcessingMetrics>,
    running: Arc<AtomicBool>,
    pin_to_core: bool,
    receiver: Option<EventReceiver>,
    handle: Option<JoinHandle<EventReceiver>>,
}

impl Aggregator {
    pub fn new(receiver: EventReceiver, registry: Arc<BookRegistry>) -> Self {
        Self {
            registry,
            metrics: Arc::new(ProcessingMetrics::default()),
            running: Arc::new(AtomicBool::new(false)),
            pin_to_core: false,
            receiver: Some(receiver),
            handle: None,
        }
    }

    /// Pin the processing thread to the last available core. The last core
    /// is the one most likely to be isolated from OS housekeeping.
    pub fn with_core_pinning(mut self, pin: bool) -> Self {
        self.pin_to_core = pin;
        self
    }

    /// Spawn the processing thread. Idempotent: a running aggregator
    /// is left alone.
    pub fn start(&mut self) -> Result<(), AggregatorError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let receiver = match self.receiver.take() {
            Some(rx) => rx,
            None => return Ok(()),
        };

        self.running.store(true, Ordering::Release);

        let registry = Arc::clone(&self.registry);
        let metrics = Arc::clone(&self.metrics);
        let running = Arc::clone(&self.running);
        let pin = self.pin_to_core;

        let handle = thread::Builder::new()
            .name("feed-aggregator".into())
            .spawn(move || processing_loop(receiver, registry, metrics, running, pin))?;

        self.handle = Some(handle);
        info!("aggregator started");
        Ok(())
    }

    /// Stop the processing thread and join it. Idempotent. When this
    /// returns, no further book mutation can occur: the in-flight batch
    /// has completed and the thread has exited.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            if let Ok(receiver) = handle.join() {
                // Hand the channel back so a later start() resumes draining.
                self.receiver = Some(receiver);
            }
            info!(
                events = self.metrics.events_processed(),
                "aggregator stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.handle.is_some()
    }

    pub fn registry(&self) -> &Arc<BookRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<ProcessingMetrics> {
        &self.metrics
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn processing_loop(
    mut receiver: EventReceiver,
    registry: Arc<BookRegistry>,
    metrics: Arc<ProcessingMetrics>,
    running: Arc<AtomicBool>,
    pin: bool,
) -> EventReceiver {
    if pin {
        pin_current_thread();
    }

    let mut batch = Vec::with_capacity(BATCH_SIZE);

    while running.load(Ordering::Acquire) {
        batch.clear();
        if receiver.dequeue_batch(&mut batch, BATCH_SIZE) == 0 {
            thread::sleep(IDLE_WAIT);
            continue;
        }

        for event in &batch {
            registry.apply(event);
            let latency_ns = event.received_at.elapsed().as_nanos() as u64;
            metrics.record_latency(latency_ns);
        }
        metrics.record_batch();
    }

    receiver
}

fn pin_current_thread() {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(last_core) = core_ids.last() {
            if core_affinity::set_for_current(*last_core) {
                debug!(core = last_core.id, "aggregator pinned");
            }
        }
    }
}
