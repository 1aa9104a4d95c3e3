//! Reader loop that fans out upstream audio to sinks.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::event::EventSink;
use crate::pipeline::Registry;
use crate::source::{Connection, ConnectionManager};
use crate::stats::StatsState;
use crate::{EngineConfig, StreamEvent};

enum ReadOutcome {
    Data(usize),
    Eof,
    TimedOut,
    Aborted,
    Failed(io::Error),
}

/// Reads chunks from the live connection and copies them into every sink.
///
/// Runs until the registry is empty. Upstream failures never end the loop:
/// they are reported and the next pass reconnects. On exit the idle
/// disconnect is re-armed, since a reconnect may have finished after the
/// last consumer left.
pub(crate) struct ReaderLoop {
    registry: Arc<Registry>,
    connection: Arc<ConnectionManager>,
    chunk_size: usize,
    read_timeout: Option<Duration>,
    reconnect_delay: Duration,
    idle_timeout: Option<Duration>,
    stats: Arc<StatsState>,
    events: EventSink,
}

impl ReaderLoop {
    pub fn new(
        registry: Arc<Registry>,
        connection: Arc<ConnectionManager>,
        config: &EngineConfig,
        stats: Arc<StatsState>,
        events: EventSink,
    ) -> Self {
        Self {
            registry,
            connection,
            chunk_size: config.chunk_size,
            read_timeout: config.read_timeout,
            reconnect_delay: config.reconnect_delay,
            idle_timeout: config.idle_timeout,
            stats,
            events,
        }
    }

    /// Writes one chunk to every registered sink.
    ///
    /// A failing sink is reported and skipped; the others still get the chunk.
    pub fn fan_out(&self, chunk: &[u8]) {
        for sink in self.registry.snapshot() {
            match sink.write(chunk) {
                Ok(0) => {}
                Ok(dropped) => {
                    self.stats.record_overflow(dropped);
                    tracing::debug!(sink = %sink.id(), dropped, "consumer behind, dropped oldest audio");
                    self.events.emit(StreamEvent::SinkOverflow {
                        sink_id: sink.id(),
                        dropped_bytes: dropped,
                    });
                }
                Err(e) => {
                    // Lost a race with the consumer closing; its own close unregisters it.
                    tracing::debug!(sink = %sink.id(), error = %e, "write to sink failed");
                    self.events.emit(StreamEvent::SinkError {
                        sink_id: sink.id(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn read_chunk(&self, conn: &Connection, buf: &mut [u8]) -> ReadOutcome {
        let read = conn.read(buf);
        let result = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => return ReadOutcome::TimedOut,
            },
            None => read.await,
        };

        match result {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted && conn.is_closed() => {
                ReadOutcome::Aborted
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::TimedOut,
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    /// Waits before retrying, cut short if the last consumer leaves.
    async fn pause(&self) {
        tokio::select! {
            () = tokio::time::sleep(self.reconnect_delay) => {}
            () = self.registry.emptied() => {}
        }
    }

    fn read_failed(&self, error: String) {
        StatsState::incr(&self.stats.read_errors);
        self.events.emit(StreamEvent::ReadError { error });
    }

    /// Runs the loop until no sinks remain.
    pub async fn run(self) {
        let mut buf = vec![0u8; self.chunk_size];
        tracing::debug!(chunk_size = self.chunk_size, "reader loop started");

        while self.registry.continue_or_stop() {
            let conn = match self.connection.live_input().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "unable to get source input stream");
                    self.read_failed(e.to_string());
                    self.pause().await;
                    continue;
                }
            };

            let outcome = tokio::select! {
                outcome = self.read_chunk(&conn, &mut buf) => Some(outcome),
                () = self.registry.emptied() => None,
            };
            let Some(outcome) = outcome else {
                continue;
            };

            match outcome {
                ReadOutcome::Data(n) => {
                    self.stats.record_chunk(n);
                    tracing::trace!(bytes = n, "read chunk from audio source");
                    self.fan_out(&buf[..n]);
                }
                ReadOutcome::Eof => {
                    tracing::info!(connection_id = conn.id(), "audio source closed the stream");
                    StatsState::incr(&self.stats.read_errors);
                    self.events.emit(StreamEvent::UpstreamClosed {
                        connection_id: conn.id(),
                    });
                    self.connection.invalidate(conn.id());
                }
                ReadOutcome::TimedOut => {
                    tracing::debug!(connection_id = conn.id(), "no audio from source before read timeout");
                    self.read_failed("read timed out".to_string());
                }
                ReadOutcome::Aborted => {
                    tracing::trace!(connection_id = conn.id(), "read aborted by disconnect");
                }
                ReadOutcome::Failed(e) => {
                    tracing::warn!(connection_id = conn.id(), error = %e, "error while reading from audio source");
                    self.read_failed(e.to_string());
                    self.connection.invalidate(conn.id());
                }
            }
        }

        let armed = self.connection.settle_idle(self.idle_timeout);
        tracing::debug!(idle_disconnect_armed = armed, "reader loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_callback;
    use crate::sink::{SinkBuffer, SinkId};
    use crate::source::{MockConnector, StaticSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        registry: Arc<Registry>,
        connection: Arc<ConnectionManager>,
        connector: Arc<MockConnector>,
        stats: Arc<StatsState>,
    }

    fn harness() -> Harness {
        let connector = Arc::new(MockConnector::new());
        let stats = Arc::new(StatsState::new());
        let registry = Arc::new(Registry::new());
        let connection = ConnectionManager::new(
            Arc::new(StaticSource::new("mock", 1)),
            connector.clone(),
            registry.clone(),
            Duration::from_secs(1),
            stats.clone(),
            EventSink::default(),
        );
        Harness {
            registry,
            connection,
            connector,
            stats,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            read_timeout: Some(Duration::from_millis(50)),
            reconnect_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn reader(h: &Harness, events: EventSink) -> ReaderLoop {
        ReaderLoop::new(
            h.registry.clone(),
            h.connection.clone(),
            &config(),
            h.stats.clone(),
            events,
        )
    }

    async fn read_exact(sink: &SinkBuffer, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            let mut buf = vec![0u8; len - out.len()];
            let n = futures::future::poll_fn(|cx| sink.poll_read(cx, &mut buf)).await;
            assert!(n > 0, "sink closed early");
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_fan_out_writes_to_all_sinks() {
        let h = harness();
        let a = Arc::new(SinkBuffer::new(SinkId::new(1), 64, 1));
        let b = Arc::new(SinkBuffer::new(SinkId::new(2), 64, 1));
        h.registry.register(a.clone());
        h.registry.register(b.clone());

        reader(&h, EventSink::default()).fan_out(&[1, 2, 3]);

        assert_eq!(a.buffered(), 3);
        assert_eq!(b.buffered(), 3);
    }

    #[test]
    fn test_fan_out_skips_closed_sink() {
        let h = harness();
        let closed = Arc::new(SinkBuffer::new(SinkId::new(1), 64, 1));
        let open = Arc::new(SinkBuffer::new(SinkId::new(2), 64, 1));
        h.registry.register(closed.clone());
        h.registry.register(open.clone());
        closed.release();

        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = errors.clone();
        let events = EventSink::new(Some(event_callback(move |event| {
            if matches!(event, StreamEvent::SinkError { .. }) {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            }
        })));

        reader(&h, events).fan_out(&[9, 9]);

        assert_eq!(open.buffered(), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fan_out_counts_overflow() {
        let h = harness();
        let small = Arc::new(SinkBuffer::new(SinkId::new(1), 4, 1));
        h.registry.register(small.clone());

        let r = reader(&h, EventSink::default());
        r.fan_out(&[1, 2, 3]);
        r.fan_out(&[4, 5, 6]);

        assert_eq!(h.stats.snapshot().overflow_bytes, 2);
    }

    #[tokio::test]
    async fn test_run_pumps_upstream_into_sink() {
        let h = harness();
        let sink = Arc::new(SinkBuffer::new(SinkId::new(1), 1024, 1));
        assert!(h.registry.register(sink.clone()));
        let task = tokio::spawn(reader(&h, EventSink::default()).run());

        let mut upstream = h.connector.next_upstream().await.unwrap();
        upstream.send(&[5; 300]).await.unwrap();

        assert_eq!(read_exact(&sink, 300).await, vec![5; 300]);

        h.registry.unregister(SinkId::new(1));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.registry.reader_state(), crate::pipeline::ReaderState::Stopped);
    }

    #[tokio::test]
    async fn test_run_reconnects_after_eof() {
        let h = harness();
        let sink = Arc::new(SinkBuffer::new(SinkId::new(1), 1024, 1));
        h.registry.register(sink.clone());
        let task = tokio::spawn(reader(&h, EventSink::default()).run());

        h.connector.next_upstream().await.unwrap().close();
        let mut second = h.connector.next_upstream().await.unwrap();
        second.send(&[1, 2, 3, 4]).await.unwrap();

        assert_eq!(read_exact(&sink, 4).await, vec![1, 2, 3, 4]);
        assert_eq!(h.connector.connections(), 2);

        h.registry.unregister(SinkId::new(1));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_survives_connect_failures() {
        let h = harness();
        h.connector.fail_times(3, io::ErrorKind::ConnectionRefused);
        let sink = Arc::new(SinkBuffer::new(SinkId::new(1), 1024, 1));
        h.registry.register(sink.clone());
        let task = tokio::spawn(reader(&h, EventSink::default()).run());

        let mut upstream = h.connector.next_upstream().await.unwrap();
        upstream.send(&[7; 10]).await.unwrap();

        assert_eq!(read_exact(&sink, 10).await, vec![7; 10]);
        assert_eq!(h.connector.attempts(), 4);
        assert!(h.stats.snapshot().read_errors >= 3);

        h.registry.unregister(SinkId::new(1));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_while_waiting_for_data() {
        let h = harness();
        h.registry.register(Arc::new(SinkBuffer::new(SinkId::new(1), 1024, 1)));
        let task = tokio::spawn(
            ReaderLoop::new(
                h.registry.clone(),
                h.connection.clone(),
                &EngineConfig {
                    read_timeout: None,
                    ..Default::default()
                },
                h.stats.clone(),
                EventSink::default(),
            )
            .run(),
        );

        let _upstream = h.connector.next_upstream().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.registry.unregister(SinkId::new(1));

        // No data ever arrives and reads never time out; the loop still exits.
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_rearms_idle_disconnect_after_late_reconnect() {
        let h = harness();
        h.connector.delay_next(Duration::from_millis(150));
        let sink = Arc::new(SinkBuffer::new(SinkId::new(1), 1024, 1));
        h.registry.register(sink.clone());
        h.connection.mark_busy();
        let task = tokio::spawn(reader(&h, EventSink::default()).run());

        // Reconnect is still in flight when the last consumer leaves.
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.registry.unregister(SinkId::new(1));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(h.connection.is_connected());
        assert!(h.connection.is_idle());
        assert!(h.connection.has_pending_disconnect());
    }
}
