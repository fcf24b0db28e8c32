//! Streaming Hot-Path Benchmarks
//!
//! Benchmarks the work done on every kline push and every ticker batch:
//! sub-minute resampling, duplicate suppression and cache writes.
//!
//! Run with: cargo bench --bench resample_bench

use std::collections::HashMap;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use venue_stream::domain::candle::Candle;
use venue_stream::domain::market::{Market, Venue};
use venue_stream::domain::resampler::{CandleTracker, SubMinuteSpan, resample};
use venue_stream::ports::market_feed::TickBatch;
use venue_stream::usecases::price_cache::PriceCache;

fn parent() -> Candle {
    Candle {
        open_time_ms: 1_700_000_040_000,
        open: 100.0,
        high: 115.0,
        low: 95.0,
        close: 110.0,
        volume: 60.0,
        is_closed: false,
    }
}

/// Resample one 1-minute bar at every supported span.
fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    for span in [
        SubMinuteSpan::ONE_SECOND,
        SubMinuteSpan::FIVE_SECONDS,
        SubMinuteSpan::FIFTEEN_SECONDS,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(span.secs()), &span, |b, span| {
            let candle = parent();
            b.iter(|| resample(black_box(&candle), *span));
        });
    }
    group.finish();
}

/// Duplicate push: the common case for venues that resend the open bar.
fn bench_tracker_duplicate(c: &mut Criterion) {
    let mut tracker = CandleTracker::new(true);
    let key = ("BTCUSDT".to_string(), "candle1m".to_string());
    tracker.observe(&key, parent());

    c.bench_function("tracker_duplicate_push", |b| {
        b.iter(|| tracker.observe(black_box(&key), parent()));
    });
}

/// Write a 500-symbol aggregate batch into the cache.
fn bench_cache_apply(c: &mut Criterion) {
    let cache = PriceCache::new(Duration::from_secs(30));
    let prices: HashMap<String, f64> = (0..500).map(|i| (format!("SYM{i}USDT"), f64::from(i) + 0.5)).collect();
    let batch = TickBatch {
        venue: Venue::Binance,
        market: Market::Futures,
        prices,
    };

    c.bench_function("cache_apply_500", |b| {
        b.iter(|| cache.apply(black_box(&batch)));
    });
}

criterion_group!(benches, bench_resample, bench_tracker_duplicate, bench_cache_apply);
criterion_main!(benches);
