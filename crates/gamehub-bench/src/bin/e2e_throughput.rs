//! End-to-end throughput benchmark for Gamehub.
//!
//! Opens N WebSocket clients that send `heartbeat:ping` as fast as the
//! server answers and counts successful responses.
//!
//! ```bash
//! GAMEHUB_RATE_LIMIT__REQUESTS_PER_MINUTE=100000000 cargo run --release -p gamehub-server
//! cargo run --release -p gamehub-bench --bin e2e_throughput -- 16 ws://127.0.0.1:8080/ws
//! ```

use futures_util::{SinkExt, StreamExt};
use gamehub_bench::ping;
use gamehub_protocol::codec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
// Requests in flight per client.
const PIPELINE: usize = 8;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Gamehub End-to-End Throughput Benchmark              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Raise the server rate limit before running:                 ║");
    println!("║  GAMEHUB_RATE_LIMIT__REQUESTS_PER_MINUTE=100000000           ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_ping_benchmark(num_clients, url).await;
}

async fn run_ping_benchmark(num_clients: usize, url: String) {
    println!("📊 Ping Benchmark: {} clients against {}", num_clients, url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let counters = Arc::clone(&counters);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, counters, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    // Clients that fail to connect never reach the barrier.
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.reset();
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let ok = counters.ok.load(Ordering::SeqCst);
    let failed = counters.failed.load(Ordering::SeqCst);

    let msgs_per_sec = ok as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!("║  Responses:            {:>10}                           ║", ok);
    println!("║  Error responses:      {:>10}                           ║", failed);
    println!(
        "║  Throughput:           {:>10.0} req/s                    ║",
        msgs_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} req/s                    ║",
        msgs_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    if failed > 0 {
        println!();
        println!("⚠ Some requests were rejected. Is the rate limit high enough?");
    }

    for handle in handles {
        handle.abort();
    }
}

#[derive(Default)]
struct Counters {
    ok: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.ok.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    barrier.wait().await;

    // Pre-encode the request once
    let request = codec::encode_message_binary(&ping(&format!("c{client_id}")))?;
    let request = Message::Binary(request.to_vec());

    for _ in 0..PIPELINE {
        sender.send(request.clone()).await?;
    }

    // Each response frees a slot for the next request.
    while let Some(result) = receiver.next().await {
        let data = match result? {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };
        match codec::decode_response_binary(&data) {
            Ok(response) if response.is_success() => {
                counters.ok.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        sender.send(request.clone()).await?;
    }

    Ok(())
}
