//! The fan-out engine facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::event::{DisconnectReason, EventSink};
use crate::pipeline::{ReaderLoop, ReaderState, Registry};
use crate::sink::{SinkBuffer, SinkId};
use crate::source::{Connector, ConnectionManager, SourceDescriptor};
use crate::stats::StatsState;
use crate::stream::{LiveStream, StreamObserver};
use crate::{
    AudioFormat, EngineConfig, EngineStats, FanoutEngineBuilder, FanoutError, StreamEvent,
};

struct EngineInner {
    config: EngineConfig,
    source: Arc<dyn SourceDescriptor>,
    connection: Arc<ConnectionManager>,
    registry: Arc<Registry>,
    stats: Arc<StatsState>,
    events: EventSink,
    next_sink_id: AtomicU64,
}

impl EngineInner {
    /// Returns the format streams will carry, or why none can be opened.
    fn check_format(&self, requested: &AudioFormat) -> Result<AudioFormat, FanoutError> {
        let Some(source_format) = self.source.source_format() else {
            return Err(FanoutError::unavailable("source does not declare a format"));
        };
        if !requested.is_compatible(&source_format) {
            return Err(FanoutError::FormatMismatch {
                requested: requested.clone(),
                source_format,
            });
        }
        Ok(source_format)
    }

    /// Marks the engine idle and arms the idle disconnect, unless other
    /// consumers are still attached.
    fn settle_idle(&self) {
        self.connection.settle_idle(self.config.idle_timeout);
    }

    fn attach(this: &Arc<Self>, format: AudioFormat) -> LiveStream {
        let id = SinkId::new(this.next_sink_id.fetch_add(1, Ordering::SeqCst) + 1);
        let frame_bytes = format.frame_bytes().unwrap_or(1);
        let sink = Arc::new(SinkBuffer::new(id, this.config.sink_capacity, frame_bytes));

        // Register before marking busy: a concurrent last close either sees
        // this sink or has its idle timer cancelled here.
        let start_reader = this.registry.register(Arc::clone(&sink));
        this.connection.mark_busy();

        if start_reader {
            tracing::debug!(sink = %id, "starting reader loop");
            let reader = ReaderLoop::new(
                Arc::clone(&this.registry),
                Arc::clone(&this.connection),
                &this.config,
                Arc::clone(&this.stats),
                this.events.clone(),
            );
            tokio::spawn(reader.run());
        }

        tracing::info!(sink = %id, consumers = this.registry.len(), "consumer attached");
        this.events.emit(StreamEvent::ConsumerAttached { sink_id: id });

        let observer: Arc<dyn StreamObserver> = this.clone();
        LiveStream::new(format, sink, observer)
    }
}

impl StreamObserver for EngineInner {
    fn on_activity(&self, idle: bool) {
        // Going idle is decided by `on_release`, once the last consumer leaves.
        if !idle {
            self.connection.set_idle(false);
        }
    }

    fn on_release(&self, sink: SinkId) {
        let Some(remaining) = self.registry.unregister(sink) else {
            // Already removed by shutdown.
            return;
        };
        tracing::info!(sink = %sink, remaining, "consumer detached");
        self.events.emit(StreamEvent::ConsumerDetached { sink_id: sink });

        if remaining == 0 {
            self.settle_idle();
        }
    }
}

/// Shares one upstream audio connection among any number of consumers.
///
/// The engine connects lazily on the first [`acquire_stream()`] and keeps a
/// single reader copying upstream chunks into every open [`LiveStream`].
/// When the last stream closes, the connection is torn down after
/// [`EngineConfig::idle_timeout`] unless a new stream arrives first.
///
/// Cloning is cheap; clones share the same engine.
///
/// # Example
///
/// ```ignore
/// use stream_fanout::{AudioFormat, FanoutEngine, StaticSource};
///
/// let engine = FanoutEngine::builder()
///     .source(StaticSource::new("192.168.1.20", 4712)
///         .with_format(AudioFormat::pcm_signed(16_000, 16, 1)))
///     .build()?;
///
/// let mut stream = engine.acquire_stream(&AudioFormat::any()).await?;
/// let mut buf = [0u8; 1024];
/// let n = stream.read(&mut buf).await?;
/// ```
///
/// [`acquire_stream()`]: FanoutEngine::acquire_stream
#[derive(Clone)]
pub struct FanoutEngine {
    inner: Arc<EngineInner>,
}

impl FanoutEngine {
    /// Creates a new builder for configuring an engine.
    pub fn builder() -> FanoutEngineBuilder {
        FanoutEngineBuilder::new()
    }

    pub(crate) fn from_parts(
        config: EngineConfig,
        source: Arc<dyn SourceDescriptor>,
        connector: Arc<dyn Connector>,
        events: EventSink,
    ) -> Self {
        let stats = Arc::new(StatsState::new());
        let registry = Arc::new(Registry::new());
        let connection = ConnectionManager::new(
            Arc::clone(&source),
            connector,
            registry.clone(),
            config.connect_timeout,
            Arc::clone(&stats),
            events.clone(),
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                source,
                connection,
                registry,
                stats,
                events,
                next_sink_id: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a new live stream of the upstream audio.
    ///
    /// `requested` may leave fields unset to accept whatever the source
    /// provides. The check happens before any connection is attempted.
    ///
    /// Connecting is tried up to [`EngineConfig::connect_attempts`] times,
    /// forcing a fresh connection between attempts.
    ///
    /// # Errors
    ///
    /// - [`FanoutError::UnavailableSource`] if the source declares no format
    /// - [`FanoutError::FormatMismatch`] if `requested` does not match it
    /// - [`FanoutError::Connection`] once every attempt failed
    /// - [`FanoutError::Interrupted`] if the engine was shut down
    pub async fn acquire_stream(&self, requested: &AudioFormat) -> Result<LiveStream, FanoutError> {
        let inner = &self.inner;
        let format = inner.check_format(requested)?;
        let attempts = inner.config.connect_attempts.max(1);

        let mut attempt = 1;
        loop {
            let error = match inner.connection.connect_if_needed().await {
                Ok(_) => return Ok(EngineInner::attach(inner, format)),
                Err(e) => e,
            };

            if !error.is_transport() {
                tracing::debug!(error = %error, "acquire interrupted");
                inner.settle_idle();
                return Err(error);
            }

            inner.connection.disconnect(DisconnectReason::Forced);
            if attempt >= attempts {
                tracing::warn!(
                    host = inner.source.host(),
                    port = inner.source.port(),
                    attempts,
                    error = %error,
                    "unable to connect to audio source"
                );
                inner.settle_idle();
                return Err(error);
            }

            tracing::debug!(attempt, error = %error, "connect failed, retrying");
            attempt += 1;
        }
    }

    /// Formats the source can deliver.
    pub fn supported_formats(&self) -> Vec<AudioFormat> {
        self.inner.source.source_format().into_iter().collect()
    }

    /// Stops the engine.
    ///
    /// Pending and future connects fail with [`FanoutError::Interrupted`].
    /// Open streams yield what they have buffered, then end-of-stream.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.connection.interrupt();
        let closed = inner.registry.close_all();
        inner.connection.set_idle(true);
        inner.connection.disconnect(DisconnectReason::Shutdown);
        tracing::info!(closed, "fan-out engine shut down");
    }

    /// Returns a snapshot of engine counters.
    pub fn stats(&self) -> EngineStats {
        self.inner.stats.snapshot()
    }

    /// Number of open streams.
    pub fn consumer_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether an upstream connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Whether the reader loop is running.
    pub fn is_reader_running(&self) -> bool {
        self.inner.registry.reader_state() == ReaderState::Running
    }

    /// Whether no consumer is actively using the engine.
    pub fn is_idle(&self) -> bool {
        self.inner.connection.is_idle()
    }

    /// Whether an idle disconnect is armed.
    pub fn has_pending_disconnect(&self) -> bool {
        self.inner.connection.has_pending_disconnect()
    }

    /// When a consumer last used the live connection, `None` while disconnected.
    pub fn last_activity(&self) -> Option<Instant> {
        self.inner.connection.last_activity()
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for FanoutEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutEngine")
            .field("host", &self.inner.source.host())
            .field("port", &self.inner.source.port())
            .field("consumers", &self.consumer_count())
            .field("connected", &self.is_connected())
            .finish()
    }
}
