//! Builder pattern for `FanoutEngine`.

use std::sync::Arc;
use std::time::Duration;

use crate::event::EventSink;
use crate::source::{Connector, SourceDescriptor, TcpConnector};
use crate::{event_callback, EngineConfig, EventCallback, FanoutEngine, FanoutError, StreamEvent};

/// Builder for configuring a [`FanoutEngine`].
///
/// Use [`FanoutEngine::builder()`] to create a new builder.
///
/// # Example
///
/// ```
/// use stream_fanout::{AudioFormat, FanoutEngine, StaticSource};
/// use std::time::Duration;
///
/// let engine = FanoutEngine::builder()
///     .source(StaticSource::new("127.0.0.1", 4712)
///         .with_format(AudioFormat::pcm_signed(16_000, 16, 1)))
///     .idle_timeout(Some(Duration::from_secs(10)))
///     .on_event(|e| tracing::debug!(?e, "engine event"))
///     .build()
///     .unwrap();
/// assert_eq!(engine.consumer_count(), 0);
/// ```
#[must_use]
pub struct FanoutEngineBuilder {
    source: Option<Arc<dyn SourceDescriptor>>,
    /// Defaults to a [`TcpConnector`].
    connector: Option<Arc<dyn Connector>>,
    event_callback: Option<EventCallback>,
    config: EngineConfig,
}

impl Default for FanoutEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FanoutEngineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            source: None,
            connector: None,
            event_callback: None,
            config: EngineConfig::default(),
        }
    }

    /// Sets the upstream source.
    pub fn source<S: SourceDescriptor + 'static>(self, source: S) -> Self {
        self.source_arc(Arc::new(source))
    }

    /// Sets an upstream source that is shared with other owners.
    pub fn source_arc(mut self, source: Arc<dyn SourceDescriptor>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replaces the transport used to reach the source.
    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Replaces the transport with one that is shared, e.g. a
    /// [`MockConnector`](crate::MockConnector) kept by a test.
    pub fn connector_arc(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set custom engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Delay before an unused connection is closed, `None` to never close it.
    ///
    /// Default: 30 seconds
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Bytes requested from the upstream per read.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes;
        self
    }

    /// Buffer size of each stream in bytes.
    pub fn sink_capacity(mut self, bytes: usize) -> Self {
        self.config.sink_capacity = bytes;
        self
    }

    /// Connect attempts per [`FanoutEngine::acquire_stream()`] call.
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.config.connect_attempts = attempts;
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include connects and disconnects, read errors, and consumers
    /// falling behind. The callback runs on engine tasks and must not block.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Validates the builder configuration, returning the source.
    fn validate(&self) -> Result<&Arc<dyn SourceDescriptor>, FanoutError> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| FanoutError::invalid_config("no source configured"))?;
        self.config.validate()?;
        Ok(source)
    }

    /// Builds the engine.
    ///
    /// Nothing is connected until the first
    /// [`acquire_stream()`](FanoutEngine::acquire_stream).
    ///
    /// # Errors
    ///
    /// [`FanoutError::InvalidConfig`] if no source is set or the
    /// configuration is unusable.
    pub fn build(self) -> Result<FanoutEngine, FanoutError> {
        let source = Arc::clone(self.validate()?);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new()));

        tracing::debug!(
            host = source.host(),
            port = source.port(),
            chunk_size = self.config.chunk_size,
            "building fan-out engine"
        );
        Ok(FanoutEngine::from_parts(
            self.config,
            source,
            connector,
            EventSink::new(self.event_callback),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioFormat, MockConnector, StaticSource};

    fn source() -> StaticSource {
        StaticSource::new("pulse.local", 4712).with_format(AudioFormat::pcm_signed(16_000, 16, 1))
    }

    #[test]
    fn test_builder_default() {
        let builder = FanoutEngineBuilder::new();
        assert!(builder.source.is_none());
        assert!(builder.connector.is_none());
        assert_eq!(builder.config.connect_attempts, 2);
    }

    #[test]
    fn test_builder_rejects_no_source() {
        let result = FanoutEngine::builder().build();
        assert!(matches!(result, Err(FanoutError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_returns_configured_source() {
        let builder = FanoutEngine::builder().source(source());
        let validated = builder.validate().unwrap();
        assert_eq!(validated.port(), 4712);

        let err = FanoutEngine::builder()
            .chunk_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: no source configured");
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let result = FanoutEngine::builder()
            .source(source())
            .chunk_size(4096)
            .sink_capacity(1024)
            .build();
        assert!(matches!(result, Err(FanoutError::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_setters() {
        let builder = FanoutEngine::builder()
            .source(source())
            .idle_timeout(None)
            .chunk_size(512)
            .sink_capacity(8192)
            .connect_attempts(4);

        assert_eq!(builder.config.idle_timeout, None);
        assert_eq!(builder.config.chunk_size, 512);
        assert_eq!(builder.config.sink_capacity, 8192);
        assert_eq!(builder.config.connect_attempts, 4);
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_builder_builds_with_mock_connector() {
        let engine = FanoutEngine::builder()
            .source(source())
            .connector(MockConnector::new())
            .build()
            .unwrap();

        assert_eq!(engine.consumer_count(), 0);
        assert!(!engine.is_connected());
        assert_eq!(
            engine.supported_formats(),
            vec![AudioFormat::pcm_signed(16_000, 16, 1)]
        );
    }
}
