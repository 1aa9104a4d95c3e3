//! Integration tests for stream-fanout.
//!
//! All upstreams are in-memory pipes from `MockConnector`, except
//! `test_tcp_end_to_end` which uses a loopback listener.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stream_fanout::{
    AudioFormat, DisconnectReason, EngineConfig, FanoutEngine, FanoutError, LiveStream,
    MockConnector, StaticSource, StreamEvent,
};
use tokio::io::AsyncReadExt;

const WAIT: Duration = Duration::from_secs(2);

fn source() -> StaticSource {
    StaticSource::new("pulse.local", 4712).with_format(AudioFormat::pcm_signed(16_000, 16, 1))
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        idle_timeout: Some(Duration::from_millis(100)),
        read_timeout: Some(Duration::from_millis(100)),
        reconnect_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

fn engine_with(connector: &Arc<MockConnector>, config: EngineConfig) -> FanoutEngine {
    FanoutEngine::builder()
        .source(source())
        .connector_arc(connector.clone())
        .with_config(config)
        .build()
        .unwrap()
}

fn engine(connector: &Arc<MockConnector>) -> FanoutEngine {
    engine_with(connector, fast_config())
}

async fn read_n(stream: &mut LiveStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for audio")
        .unwrap();
    buf
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_reader_runs_only_while_consumers_exist() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);
    assert!(!engine.is_reader_running());

    let mut a = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let b = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    assert!(engine.is_reader_running());

    a.close();
    assert!(engine.is_reader_running());

    drop(b);
    assert!(wait_until(|| !engine.is_reader_running()).await);

    // A later consumer starts a fresh loop.
    let _c = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    assert!(engine.is_reader_running());
}

#[tokio::test]
async fn test_late_consumer_never_sees_earlier_bytes() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let mut a = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut upstream = connector.next_upstream().await.unwrap();
    upstream.send(&[1; 64]).await.unwrap();
    assert_eq!(read_n(&mut a, 64).await, vec![1; 64]);

    let mut b = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    upstream.send(&[2; 64]).await.unwrap();

    assert_eq!(read_n(&mut a, 64).await, vec![2; 64]);
    assert_eq!(read_n(&mut b, 64).await, vec![2; 64]);
    assert_eq!(connector.connections(), 1);
}

#[tokio::test]
async fn test_two_consumers_then_one() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let mut a = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut b = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut upstream = connector.next_upstream().await.unwrap();

    let first = pattern(512);
    upstream.send(&first).await.unwrap();
    assert_eq!(read_n(&mut a, 512).await, first);
    assert_eq!(read_n(&mut b, 512).await, first);

    a.close();
    assert_eq!(engine.consumer_count(), 1);

    let second = vec![0xAB; 512];
    upstream.send(&second).await.unwrap();
    assert_eq!(read_n(&mut b, 512).await, second);

    let mut buf = [0u8; 16];
    assert!(matches!(
        a.read(&mut buf).await,
        Err(FanoutError::ClosedStream)
    ));
}

#[tokio::test]
async fn test_close_during_writes_always_unregisters() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let mut streams = Vec::new();
    for _ in 0..4 {
        streams.push(engine.acquire_stream(&AudioFormat::any()).await.unwrap());
    }
    let mut upstream = connector.next_upstream().await.unwrap();

    let writer = tokio::spawn(async move {
        for _ in 0..200 {
            if upstream.send(&[3; 256]).await.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
        upstream
    });

    for mut stream in streams {
        let _ = read_n(&mut stream, 2).await;
        stream.close();
    }
    assert_eq!(engine.consumer_count(), 0);

    let _upstream = writer.await.unwrap();
    assert!(wait_until(|| !engine.is_reader_running()).await);
}

#[tokio::test]
async fn test_idle_disconnect_after_last_close() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    assert!(engine.is_connected());
    drop(stream);

    assert!(engine.is_idle());
    assert!(engine.is_connected());
    assert!(wait_until(|| !engine.is_connected()).await);
    assert_eq!(engine.stats().disconnects, 1);
}

#[tokio::test]
async fn test_reacquire_before_idle_delay_reuses_connection() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine_with(
        &connector,
        EngineConfig {
            idle_timeout: Some(Duration::from_millis(300)),
            ..fast_config()
        },
    );

    drop(engine.acquire_stream(&AudioFormat::any()).await.unwrap());
    assert!(engine.has_pending_disconnect());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    assert!(!engine.has_pending_disconnect());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(engine.is_connected());
    assert_eq!(connector.connections(), 1);
}

#[tokio::test]
async fn test_idle_timeout_none_keeps_connection() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine_with(
        &connector,
        EngineConfig {
            idle_timeout: None,
            ..fast_config()
        },
    );

    drop(engine.acquire_stream(&AudioFormat::any()).await.unwrap());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(engine.is_idle());
    assert!(engine.is_connected());
    assert!(!engine.has_pending_disconnect());
}

#[tokio::test]
async fn test_incompatible_format_touches_nothing() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let requested = AudioFormat {
        sample_rate: Some(48_000),
        ..AudioFormat::any()
    };
    let err = engine.acquire_stream(&requested).await.unwrap_err();

    match err {
        FanoutError::FormatMismatch {
            requested: r,
            source_format,
        } => {
            assert_eq!(r.sample_rate, Some(48_000));
            assert_eq!(source_format.sample_rate, Some(16_000));
        }
        other => panic!("expected format mismatch, got {other:?}"),
    }
    assert_eq!(connector.attempts(), 0);
    assert_eq!(engine.consumer_count(), 0);
    assert!(!engine.is_connected());
}

#[tokio::test]
async fn test_connect_fails_twice() {
    let connector = Arc::new(MockConnector::new());
    connector.fail_times(2, io::ErrorKind::ConnectionRefused);
    let engine = engine(&connector);

    let err = engine.acquire_stream(&AudioFormat::any()).await.unwrap_err();

    match err {
        FanoutError::Connection { host, port, source } => {
            assert_eq!(host, "pulse.local");
            assert_eq!(port, 4712);
            assert_eq!(source.kind(), io::ErrorKind::ConnectionRefused);
        }
        other => panic!("expected connection error, got {other:?}"),
    }
    assert_eq!(connector.attempts(), 2);
    assert!(!engine.is_connected());
    assert!(engine.is_idle());
    assert_eq!(engine.consumer_count(), 0);
}

#[tokio::test]
async fn test_read_after_close() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let mut stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    stream.close();
    stream.close();

    let mut buf = [0u8; 8];
    assert!(matches!(
        stream.read(&mut buf).await,
        Err(FanoutError::ClosedStream)
    ));
    let err = stream.read_exact(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_slow_consumer_loses_only_its_oldest_audio() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine_with(
        &connector,
        EngineConfig {
            chunk_size: 256,
            sink_capacity: 1024,
            ..fast_config()
        },
    );

    let mut fast = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut slow = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut upstream = connector.next_upstream().await.unwrap();

    let audio = pattern(4096);
    for chunk in audio.chunks(256) {
        upstream.send(chunk).await.unwrap();
        // Keep the fast consumer within its buffer.
        assert_eq!(read_n(&mut fast, chunk.len()).await, chunk);
    }

    assert!(wait_until(|| slow.dropped_bytes() == 3072).await);
    assert_eq!(slow.buffered(), 1024);
    assert_eq!(read_n(&mut slow, 1024).await, &audio[3072..]);
    assert_eq!(fast.dropped_bytes(), 0);
    assert_eq!(engine.stats().overflow_bytes, 3072);
}

#[tokio::test]
async fn test_upstream_eof_reconnects() {
    let connector = Arc::new(MockConnector::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let engine = FanoutEngine::builder()
        .source(source())
        .connector_arc(connector.clone())
        .with_config(fast_config())
        .on_event(move |event| recorded.lock().push(event))
        .build()
        .unwrap();

    let mut stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut first = connector.next_upstream().await.unwrap();
    first.send(&[1; 32]).await.unwrap();
    assert_eq!(read_n(&mut stream, 32).await, vec![1; 32]);
    first.close();

    let mut second = tokio::time::timeout(WAIT, connector.next_upstream())
        .await
        .unwrap()
        .unwrap();
    second.send(&[2; 32]).await.unwrap();
    assert_eq!(read_n(&mut stream, 32).await, vec![2; 32]);

    assert_eq!(engine.stats().connects, 2);
    let events = events.lock();
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::UpstreamClosed { connection_id: 1 })));
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Disconnected {
            connection_id: 1,
            reason: DisconnectReason::Lost
        }
    )));
}

#[tokio::test]
async fn test_shutdown_drains_then_ends_streams() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let mut a = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut b = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let mut upstream = connector.next_upstream().await.unwrap();
    upstream.send(&[4; 100]).await.unwrap();
    assert!(wait_until(|| a.buffered() == 100 && b.buffered() == 100).await);

    engine.shutdown();
    assert_eq!(engine.consumer_count(), 0);
    assert!(!engine.is_connected());

    assert_eq!(read_n(&mut a, 100).await, vec![4; 100]);
    let mut buf = [0u8; 16];
    assert_eq!(a.read(&mut buf).await.unwrap(), 0);

    let mut rest = Vec::new();
    b.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, vec![4; 100]);

    assert!(wait_until(|| !engine.is_reader_running()).await);
    assert!(matches!(
        engine.acquire_stream(&AudioFormat::any()).await,
        Err(FanoutError::Interrupted)
    ));
}

#[tokio::test]
async fn test_shutdown_interrupts_pending_connect() {
    let connector = Arc::new(MockConnector::new());
    connector.stall_next();
    let engine = engine(&connector);

    let pending = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.acquire_stream(&AudioFormat::any()).await.map(|s| s.id()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.shutdown();

    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(FanoutError::Interrupted)));
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_events_track_consumer_lifecycle() {
    let connector = Arc::new(MockConnector::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let engine = FanoutEngine::builder()
        .source(source())
        .connector_arc(connector.clone())
        .with_config(fast_config())
        .on_event(move |event| recorded.lock().push(event))
        .build()
        .unwrap();

    let stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    let id = stream.id();
    drop(stream);
    assert!(wait_until(|| !engine.is_connected()).await);

    let events = events.lock();
    assert!(matches!(events[0], StreamEvent::Connected { port: 4712, .. }));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ConsumerAttached { sink_id } if *sink_id == id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ConsumerDetached { sink_id } if *sink_id == id)));
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Disconnected {
            reason: DisconnectReason::Idle,
            ..
        }
    )));
}

#[tokio::test]
async fn test_last_close_during_reconnect_still_disconnects() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine(&connector);

    let mut stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    connector.delay_next(Duration::from_millis(300));
    connector.next_upstream().await.unwrap().close();

    // The reader loop is now waiting on the slow reconnect.
    tokio::time::sleep(Duration::from_millis(80)).await;
    stream.close();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(engine.consumer_count(), 0);
    assert!(!engine.is_reader_running());
    assert_eq!(connector.connections(), 2);
    assert!(!engine.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_and_acquire_keep_idle_state_consistent() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine_with(
        &connector,
        EngineConfig {
            idle_timeout: Some(Duration::from_secs(10)),
            ..fast_config()
        },
    );

    for _ in 0..300 {
        let a = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
        let closer = tokio::spawn(async move { drop(a) });
        let b = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
        closer.await.unwrap();

        assert_eq!(engine.consumer_count(), 1);
        assert!(engine.is_reader_running());
        assert!(!engine.is_idle());
        assert!(!engine.has_pending_disconnect());

        drop(b);
        assert!(wait_until(|| !engine.is_reader_running()).await);
        assert!(engine.is_idle());
        assert!(engine.has_pending_disconnect() || !engine.is_connected());
    }
    assert_eq!(connector.connections(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_churning_consumers_never_arm_disconnect_under_a_holder() {
    let connector = Arc::new(MockConnector::new());
    let engine = engine_with(
        &connector,
        EngineConfig {
            idle_timeout: Some(Duration::from_secs(10)),
            ..fast_config()
        },
    );
    let holder = engine.acquire_stream(&AudioFormat::any()).await.unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
                    tokio::task::yield_now().await;
                    drop(stream);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(engine.consumer_count(), 1);
    assert!(engine.is_reader_running());
    assert!(!engine.is_idle());
    assert!(!engine.has_pending_disconnect());
    assert!(engine.is_connected());

    drop(holder);
    assert!(wait_until(|| !engine.is_reader_running()).await);
    assert!(engine.is_idle());
    assert!(engine.has_pending_disconnect());
}

#[tokio::test]
async fn test_tcp_end_to_end() {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let engine = FanoutEngine::builder()
        .source(
            StaticSource::new("127.0.0.1", port)
                .with_format(AudioFormat::pcm_signed(16_000, 16, 1)),
        )
        .with_config(fast_config())
        .build()
        .unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(&pattern(2048)).await.unwrap();
        socket
    });

    let mut stream = engine.acquire_stream(&AudioFormat::any()).await.unwrap();
    assert_eq!(read_n(&mut stream, 2048).await, pattern(2048));

    let _socket = server.await.unwrap();
    stream.close();
    engine.shutdown();
}
