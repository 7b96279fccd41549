//! End-to-end throughput benchmark for Herald.
//!
//! Measures WebSocket event throughput against a running server with real
//! network I/O. Every client subscribes to one topic and publishes to it, so
//! each publish fans out to all clients.

use futures_util::{SinkExt, StreamExt};
use herald_protocol::{codec, Reply};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_ADDR: &str = "127.0.0.1:8080";
const TOPIC: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Herald End-to-End Throughput Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    ensure_topic().await?;
    run_pubsub_benchmark(num_clients).await;
    Ok(())
}

/// Create the benchmark topic over HTTP; an existing topic is fine.
async fn ensure_topic() -> Result<(), BoxError> {
    let body = json!({ "name": TOPIC }).to_string();
    let request = format!(
        "POST /topics HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        SERVER_ADDR,
        body.len(),
        body
    );

    let mut stream = TcpStream::connect(SERVER_ADDR).await?;
    stream.write_all(request.as_bytes()).await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;

    let status = response.split_whitespace().nth(1).unwrap_or_default();
    match status {
        "201" => println!("✓ Created topic '{}'", TOPIC),
        "409" => println!("✓ Topic '{}' already exists", TOPIC),
        other => return Err(format!("unexpected status creating topic: {}", other).into()),
    }
    Ok(())
}

async fn run_pubsub_benchmark(num_clients: usize) {
    println!("📊 Pub/Sub Benchmark: {} clients", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let event_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    // Spawn client tasks
    for client_id in 0..num_clients {
        let event_count = Arc::clone(&event_count);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, event_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to subscribe
    barrier.wait().await;
    println!("✓ All {} clients subscribed", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    event_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_events = event_count.load(Ordering::SeqCst);

    let events_per_sec = total_events as f64 / elapsed.as_secs_f64();
    let events_per_sec_per_client = events_per_sec / num_clients as f64;

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
    println!(
        "║  Events Received:      {:>10}                           ║",
        total_events
    );
    println!(
        "║  Throughput:           {:>10.0} evt/s                    ║",
        events_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} evt/s                    ║",
        events_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    event_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    // MessagePack replies keep decoding cheap on the client side.
    let url = format!("ws://{}/ws?format=msgpack", SERVER_ADDR);
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let subscribe = json!({
        "action": "subscribe",
        "topic": TOPIC,
        "request_id": format!("sub-{}", client_id),
    });
    sender.send(Message::Text(subscribe.to_string())).await?;

    // Skip `connected` and wait for the subscribe ack
    while let Some(frame) = receiver.next().await {
        if let Message::Binary(data) = frame? {
            if let Reply::Ack { .. } = codec::decode_reply_binary(&data)? {
                break;
            }
        }
    }

    barrier.wait().await;

    let publish = Message::Text(
        json!({
            "action": "publish",
            "topic": TOPIC,
            "message": { "client": client_id, "data": "x".repeat(64) },
        })
        .to_string(),
    );

    // Separate receiver task for full-duplex operation
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if let Message::Binary(data) = frame {
                if let Ok(Reply::Event { .. }) = codec::decode_reply_binary(&data) {
                    event_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    // Send loop - no waiting for acks
    loop {
        if sender.send(publish.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
