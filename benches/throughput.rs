//! Criterion benchmarks for the hot paths: ring transfer, book mutation,
//! and the read-side analytics.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use flash_feed::ring;
use flash_feed::{OrderBook, Price, Side, Symbol};

fn bench_spsc_transfer(c: &mut Criterion) {
    c.bench_function("spsc_push_pop", |b| {
        let (mut tx, mut rx) = ring::spsc::<u64>(4096);
        let mut value = 0u64;
        b.iter(|| {
            value += 1;
            let _ = tx.try_push(black_box(value));
            black_box(rx.try_pop())
        })
    });
}

fn bench_mpsc_transfer(c: &mut Criterion) {
    c.bench_function("mpsc_push_pop", |b| {
        let (tx, mut rx) = ring::mpsc::<u64>(4096);
        let mut value = 0u64;
        b.iter(|| {
            value += 1;
            let _ = tx.try_push(black_box(value));
            black_box(rx.try_pop())
        })
    });
}

fn bench_book_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("book_add");

    for levels in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(levels), levels, |b, &levels| {
            let book = OrderBook::new(Symbol::new("BENCH"));
            let mut rng = ChaCha8Rng::seed_from_u64(42);

            b.iter(|| {
                let tick = rng.gen_range(0..levels) as i64;
                let price = Price::from_raw(1_000_000 + tick * 100);
                let side = if rng.gen_bool(0.5) {
                    Side::Buy
                } else {
                    Side::Sell
                };
                book.add(black_box(price), 10, side)
            })
        });
    }

    group.finish();
}

fn bench_trade_print(c: &mut Criterion) {
    c.bench_function("apply_trade", |b| {
        let book = OrderBook::new(Symbol::new("BENCH"));
        let mut price = 1_000_000i64;
        b.iter(|| {
            price += 1;
            book.apply_trade(black_box(Price::from_raw(price)), 10)
        })
    });
}

fn bench_read_side(c: &mut Criterion) {
    let book = OrderBook::new(Symbol::new("BENCH"));
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..500 {
        let tick = rng.gen_range(0..250) as i64;
        book.add(Price::from_raw(990_000 - tick * 100), 10, Side::Buy);
        book.add(Price::from_raw(1_010_000 + tick * 100), 10, Side::Sell);
    }

    c.bench_function("best_bid_lock_free", |b| b.iter(|| black_box(book.best_bid())));
    c.bench_function("imbalance_depth5", |b| {
        b.iter(|| black_box(book.imbalance(flash_feed::IMBALANCE_DEPTH)))
    });
    c.bench_function("snapshot_depth10", |b| {
        b.iter(|| black_box(book.snapshot(flash_feed::DEFAULT_DEPTH)))
    });
}

criterion_group!(
    benches,
    bench_spsc_transfer,
    bench_mpsc_transfer,
    bench_book_add,
    bench_trade_print,
    bench_read_side
);
criterion_main!(benches);
