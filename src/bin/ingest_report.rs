//! End-to-end ingest report: simulator -> channel -> aggregator.
//!
//! Runs the full pipeline for a bounded duration, then prints a latency
//! histogram of direct book application plus the per-symbol market summary
//! observed by a concurrent reader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use hdrhistogram::Histogram;

use flash_feed::sim::{MarketSimulator, SimConfig};
use flash_feed::{event_channel, Aggregator, BookRegistry};

#[derive(Parser, Debug)]
#[command(name = "ingest-report", about = "Run the feed pipeline and report latency")]
struct Args {
    /// How long to run the pipeline, in seconds
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,

    /// Event channel capacity (power of two)
    #[arg(long, default_value_t = 131_072)]
    channel_capacity: usize,

    /// Pause between per-symbol generation sweeps, in microseconds
    #[arg(long, default_value_t = 10)]
    pace_micros: u64,

    /// Probability that a generated event is a trade
    #[arg(long, default_value_t = 0.3)]
    trade_probability: f64,

    /// Pin the aggregator thread to the last core
    #[arg(long, default_value_t = false)]
    pin: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let (mut sender, receiver) = event_channel(args.channel_capacity);
    let registry = Arc::new(BookRegistry::new());
    let mut aggregator =
        Aggregator::new(receiver, Arc::clone(&registry)).with_core_pinning(args.pin);
    aggregator.start().expect("aggregator start");

    let config = SimConfig {
        trade_probability: args.trade_probability,
        ..SimConfig::default()
    };
    let shutdown = Arc::new(AtomicBool::new(false));

    println!(
        "Running pipeline for {}s over {} symbols...",
        args.duration_secs,
        config.symbols.len()
    );

    let producer = {
        let shutdown = Arc::clone(&shutdown);
        let pace = Duration::from_micros(args.pace_micros);
        thread::spawn(move || {
            let mut sim =
                MarketSimulator::new(config, rand::thread_rng()).expect("simulator config");
            sim.run(&mut sender, &shutdown, pace);
            (sim.events_generated(), sender.dropped_count())
        })
    };

    // A concurrent reader polling top-of-book the whole time, the way an
    // egress adapter would.
    let reader = {
        let registry = Arc::clone(&registry);
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            let mut reads = 0u64;
            while !shutdown.load(Ordering::Acquire) {
                for symbol in registry.active_symbols() {
                    if let Some(book) = registry.get(&symbol) {
                        std::hint::black_box((book.best_bid(), book.best_ask(), book.spread()));
                        reads += 1;
                    }
                }
                thread::sleep(Duration::from_millis(1));
            }
            reads
        })
    };

    thread::sleep(Duration::from_secs(args.duration_secs));
    shutdown.store(true, Ordering::Release);

    let (generated, dropped) = producer.join().expect("producer thread");
    let reads = reader.join().expect("reader thread");

    // Let the aggregator drain what remains, then stop it.
    let drain_deadline = Instant::now() + Duration::from_secs(2);
    while aggregator.metrics().events_processed() + dropped < generated
        && Instant::now() < drain_deadline
    {
        thread::sleep(Duration::from_millis(5));
    }
    aggregator.stop();

    let metrics = aggregator.metrics();
    println!("\n=== Pipeline Report ===");
    println!("Generated:   {}", generated);
    println!("Processed:   {}", metrics.events_processed());
    println!("Dropped:     {}", dropped);
    println!("Batches:     {}", metrics.batches());
    println!("Reader hits: {}", reads);
    println!("Avg latency: {} ns (EMA)", metrics.avg_latency_ns());
    println!("Max latency: {} ns", metrics.max_latency_ns());

    // Direct-application histogram: replays a deterministic burst straight
    // into one book to characterize mutation cost without queueing delay.
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 10_000_000, 3).expect("histogram");
    let book = registry.get_or_create(flash_feed::Symbol::new("BENCH"));
    for i in 0..100_000u64 {
        let price = flash_feed::Price::from_raw(1_000_000 + (i % 100) as i64 * 100);
        let side = if i % 2 == 0 {
            flash_feed::Side::Buy
        } else {
            flash_feed::Side::Sell
        };
        let start = Instant::now();
        std::hint::black_box(book.add(price, 10, side));
        histogram
            .record(start.elapsed().as_nanos() as u64)
            .unwrap_or(());
    }

    println!("\n=== Book Mutation Latency (ns) ===");
    println!("P50:    {:6}", histogram.value_at_quantile(0.50));
    println!("P90:    {:6}", histogram.value_at_quantile(0.90));
    println!("P99:    {:6}", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6}", histogram.value_at_quantile(0.999));
    println!("Max:    {:6}", histogram.max());

    println!("\n=== Market Summary ===");
    let mut summary = registry.market_summary();
    summary.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    for row in summary {
        println!(
            "{:<10} bid {:>12.4} ask {:>12.4} spread {:>8.4} imb {:>6.3} vol {:>10} trades {:>8} vola {:>6.3}",
            row.symbol.as_str(),
            row.best_bid,
            row.best_ask,
            row.spread,
            row.imbalance,
            row.volume,
            row.trade_count,
            row.volatility,
        );
    }
}
