//! Throughput benchmarks for Gamehub.
//!
//! These benchmarks measure the raw operation rate of the shared structures
//! every request goes through.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gamehub_bench::{connect, hub};
use gamehub_core::{CacheConfig, HubConfig, RateLimitConfig, RateLimiter, TtlCache};
use gamehub_transport::WireFrame;
use std::time::Duration;

/// Benchmark rate limiter admission.
fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    group.throughput(Throughput::Elements(1));

    let limiter = RateLimiter::with_config(RateLimitConfig {
        max_requests: usize::MAX,
        ..RateLimitConfig::default()
    });
    group.bench_function("single_client", |b| {
        b.iter(|| limiter.is_allowed(black_box("conn-1")))
    });

    for clients in [100, 10_000] {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            max_requests: 60,
            ..RateLimitConfig::default()
        });
        let ids: Vec<String> = (0..clients).map(|i| format!("conn-{i}")).collect();
        let mut next = 0;
        group.bench_with_input(BenchmarkId::new("many_clients", clients), &ids, |b, ids| {
            b.iter(|| {
                next = (next + 1) % ids.len();
                limiter.is_allowed(black_box(&ids[next]))
            })
        });
    }

    group.finish();
}

/// Benchmark cache reads and writes.
fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    let cache: TtlCache<u64, u64> = TtlCache::with_config(CacheConfig {
        capacity: 10_000,
        ..CacheConfig::default()
    });
    for key in 0..10_000 {
        cache.insert(key, key);
    }

    let mut key = 0;
    group.bench_function("get_hit", |b| {
        b.iter(|| {
            key = (key + 1) % 10_000;
            cache.get(black_box(&key))
        })
    });

    group.bench_function("get_miss", |b| b.iter(|| cache.get(black_box(&u64::MAX))));

    // Every insert of a new key evicts the least recently used one.
    let mut fresh = 10_000;
    group.bench_function("set_evicting", |b| {
        b.iter(|| {
            fresh += 1;
            cache.set(black_box(fresh), fresh, Duration::from_secs(300));
        })
    });

    group.finish();
}

/// Benchmark hub broadcast fan-out.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for connections in [10, 100, 1000] {
        group.throughput(Throughput::Elements(connections as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, &connections| {
                let hub = hub(HubConfig::default());
                // Drain every queue so no connection is evicted as slow.
                for _ in 0..connections {
                    let (_ctx, mut rx) = connect(&hub, 1024);
                    runtime.spawn(async move { while rx.recv().await.is_some() {} });
                }
                let frame = WireFrame::Text("{\"category\":\"notice\"}".into());

                b.to_async(&runtime).iter(|| {
                    let hub = hub.clone();
                    let frame = frame.clone();
                    async move { hub.broadcast(frame).await }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_rate_limiter, bench_cache, bench_broadcast);
criterion_main!(benches);
