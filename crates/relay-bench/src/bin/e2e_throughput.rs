//! End-to-end throughput benchmark for Relay.
//!
//! Every client joins one channel and sends chat lines as fast as the
//! socket allows; each received `chat` broadcast is counted.
//!
//! All clients share the loopback address, so the server's rate limiter
//! has to be opened up first:
//!
//! ```bash
//! RELAY_POLICE__THRESHOLD=1e12 cargo run --release --bin relay
//! cargo run --release --bin e2e_throughput -- 16
//! ```

use futures_util::{SinkExt, StreamExt};
use relay_protocol::{codec, kind, Payload};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:6060/chat-ws";
const CHANNEL: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type ClientError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Relay end-to-end throughput benchmark");
    println!("  server:  {url}");
    println!("  clients: {num_clients}");
    println!("  warmup {WARMUP_SECS}s, measurement {BENCH_SECS}s");
    println!();

    run_chat_benchmark(&url, num_clients).await;
}

async fn run_chat_benchmark(url: &str, num_clients: usize) {
    let received = Arc::new(AtomicU64::new(0));
    let sent = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let sent = Arc::clone(&sent);
        let barrier = Arc::clone(&barrier);
        let url = url.to_string();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, client_id, received, sent, barrier).await {
                eprintln!("client {client_id} error: {e}");
            }
        }));
    }

    barrier.wait().await;
    println!("all {num_clients} clients joined ?{CHANNEL}");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_received = received.load(Ordering::SeqCst);
    let total_sent = sent.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  duration:        {elapsed:>12.2}s");
    println!("  chat sent:       {total_sent:>12}");
    println!("  chat delivered:  {total_received:>12}");
    println!(
        "  sent/s:          {:>12.0}",
        total_sent as f64 / elapsed
    );
    println!(
        "  delivered/s:     {:>12.0}",
        total_received as f64 / elapsed
    );
    println!(
        "  per client:      {:>12.0} msg/s",
        total_received as f64 / elapsed / num_clients as f64
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    client_id: usize,
    received: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), ClientError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let join = Payload::new("join")
        .with("channel", CHANNEL)
        .with("nick", format!("bench{client_id}"));
    sender.send(Message::Text(codec::encode_text(&join)?)).await?;

    // The join is acknowledged with our own onlineSet.
    while let Some(frame) = receiver.next().await {
        if let Message::Text(text) = frame? {
            let payload = codec::decode_text(&text)?;
            match payload.cmd() {
                Some(kind::ONLINE_SET) => break,
                Some(kind::WARN) => {
                    return Err(payload.get_str("text").unwrap_or("join refused").into())
                }
                _ => {}
            }
        }
    }

    barrier.wait().await;

    let chat = Payload::new("chat").with("text", "x".repeat(64));
    let chat_msg = Message::Text(codec::encode_text(&chat)?);

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if let Message::Text(text) = frame {
                if let Ok(payload) = codec::decode_text(&text) {
                    if payload.cmd() == Some(kind::CHAT) {
                        received.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    loop {
        if sender.send(chat_msg.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
