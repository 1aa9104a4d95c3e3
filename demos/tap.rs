//! Tap example.
//!
//! Connects to a raw PCM TCP stream (e.g. PulseAudio `module-simple-protocol-tcp`)
//! and reads it from two consumers at once, printing throughput.
//!
//! Run with: cargo run --example tap -- <host> <port>

use std::time::{Duration, Instant};

use stream_fanout::{AudioFormat, FanoutEngine, LiveStream, StaticSource, StreamEvent};

async fn consume(name: &'static str, mut stream: LiveStream, run_for: Duration) -> u64 {
    let started = Instant::now();
    let mut buf = vec![0u8; 4096];
    let mut total = 0u64;

    while started.elapsed() < run_for {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => total += n as u64,
            Err(e) => {
                eprintln!("{name}: read failed: {e}");
                break;
            }
        }
    }
    println!("{name}: read {total} bytes in {:?}", started.elapsed());
    total
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map_or(Ok(4712), |p| p.parse())?;

    let engine = FanoutEngine::builder()
        .source(StaticSource::new(host, port).with_format(AudioFormat::pcm_signed(16_000, 16, 1)))
        .idle_timeout(Some(Duration::from_secs(2)))
        .on_event(|event| match event {
            StreamEvent::SinkOverflow {
                sink_id,
                dropped_bytes,
            } => {
                eprintln!("Warning: {sink_id} dropped {dropped_bytes} bytes");
            }
            StreamEvent::Disconnected { reason, .. } => {
                eprintln!("Disconnected: {reason}");
            }
            other => tracing::debug!(?other, "engine event"),
        })
        .build()?;

    for format in engine.supported_formats() {
        println!("Tapping {format} for 5 seconds...");
    }

    let first = engine.acquire_stream(&AudioFormat::any()).await?;
    let second = engine.acquire_stream(&AudioFormat::any()).await?;

    let (a, b) = tokio::join!(
        consume("first", first, Duration::from_secs(5)),
        consume("second", second, Duration::from_secs(3)),
    );
    println!("Total: {} bytes", a + b);

    let stats = engine.stats();
    println!(
        "Upstream: {} chunks, {} bytes, {} reconnects",
        stats.chunks_read,
        stats.bytes_read,
        stats.connects.saturating_sub(1)
    );

    engine.shutdown();
    Ok(())
}
