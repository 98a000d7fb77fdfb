//! Latency benchmarks for Gamehub.
//!
//! These benchmarks measure the time a single request spends in the server,
//! from router dispatch up to a full session round-trip.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gamehub_bench::{connect, hub, ping};
use gamehub_core::{serve, HubConfig, UserId};
use gamehub_protocol::{codec, Message};
use gamehub_transport::memory;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// Benchmark dispatch through the standard middleware chain.
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let runtime = Runtime::new().unwrap();
    let hub = hub(HubConfig::default());

    let (guest, _guest_rx) = connect(&hub, 16);
    let msg = ping("p1");
    group.bench_function("public_route", |b| {
        b.to_async(&runtime)
            .iter(|| async { hub.router().dispatch(&guest, black_box(&msg)).await })
    });

    let denied = Message::new("bench", "echo", "d1");
    group.bench_function("rejected_unauthenticated", |b| {
        b.to_async(&runtime)
            .iter(|| async { hub.router().dispatch(&guest, black_box(&denied)).await })
    });

    let (player, _player_rx) = connect(&hub, 16);
    runtime.block_on(player.authenticate(UserId(1))).unwrap();
    let echo = Message::new("bench", "echo", "e1").with_payload(json!({ "x": 1, "y": 2 }));
    group.bench_function("authenticated_route", |b| {
        b.to_async(&runtime)
            .iter(|| async { hub.router().dispatch(&player, black_box(&echo)).await })
    });

    group.finish();
}

/// Benchmark request/response round-trips through a live session.
fn bench_session_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_roundtrip");
    let runtime = Runtime::new().unwrap();

    let text = codec::encode_message_text(&ping("rt")).unwrap();
    group.bench_function("json", |b| {
        b.iter_custom(|iters| {
            runtime.block_on(async {
                let hub = hub(HubConfig::default());
                let (source, sink, mut client) = memory::duplex(64);
                let session = tokio::spawn(serve(hub, source, sink));

                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    client.send_text(text.clone()).await.unwrap();
                    black_box(client.recv_text().await.unwrap());
                    elapsed += start.elapsed();
                }

                client.disconnect();
                let _ = session.await;
                elapsed
            })
        });
    });

    let data = codec::encode_message_binary(&ping("rt")).unwrap();
    group.bench_function("msgpack", |b| {
        b.iter_custom(|iters| {
            runtime.block_on(async {
                let hub = hub(HubConfig::default());
                let (source, sink, mut client) = memory::duplex(64);
                let session = tokio::spawn(serve(hub, source, sink));

                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    client
                        .send(gamehub_transport::WireFrame::Binary(data.clone()))
                        .await
                        .unwrap();
                    black_box(client.recv().await.unwrap());
                    elapsed += start.elapsed();
                }

                client.disconnect();
                let _ = session.await;
                elapsed
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_session_roundtrip);
criterion_main!(benches);
