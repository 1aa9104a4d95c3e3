//! Configuration types for the fan-out engine.

use std::time::Duration;

use crate::FanoutError;

/// Default bytes requested from the upstream per read.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default per-consumer buffer size in bytes.
pub const DEFAULT_SINK_CAPACITY: usize = 20 * 1024;

/// Configuration for engine behavior.
///
/// Use [`EngineConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use stream_fanout::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig {
///     idle_timeout: Some(Duration::from_secs(5)),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of bytes read from the upstream in one pass.
    ///
    /// Default: 1024
    pub chunk_size: usize,

    /// Capacity of each consumer's buffer in bytes.
    ///
    /// When a consumer falls this far behind, its oldest bytes are
    /// dropped and a [`StreamEvent::SinkOverflow`] is emitted.
    /// Default: 20 KiB
    ///
    /// [`StreamEvent::SinkOverflow`]: crate::StreamEvent::SinkOverflow
    pub sink_capacity: usize,

    /// How long the engine must stay idle before the upstream is closed.
    ///
    /// `None` keeps the connection open until [`FanoutEngine::shutdown()`].
    /// Default: 30 seconds
    ///
    /// [`FanoutEngine::shutdown()`]: crate::FanoutEngine::shutdown
    pub idle_timeout: Option<Duration>,

    /// Upper bound on a single connect attempt.
    ///
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Upper bound on a single upstream read, `None` to wait forever.
    ///
    /// A timed out read is a transient error; the connection is kept.
    /// Default: 2 seconds
    pub read_timeout: Option<Duration>,

    /// Pause between reconnect attempts made by the reader loop.
    ///
    /// Default: 500ms
    pub reconnect_delay: Duration,

    /// Connect attempts per [`FanoutEngine::acquire_stream()`] call.
    ///
    /// Default: 2
    ///
    /// [`FanoutEngine::acquire_stream()`]: crate::FanoutEngine::acquire_stream
    pub connect_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            idle_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(2)),
            reconnect_delay: Duration::from_millis(500),
            connect_attempts: 2,
        }
    }
}

impl EngineConfig {
    /// Checks that the configuration can drive an engine.
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.chunk_size == 0 {
            return Err(FanoutError::invalid_config("chunk_size must be non-zero"));
        }
        if self.sink_capacity < self.chunk_size {
            return Err(FanoutError::invalid_config(format!(
                "sink_capacity ({}) must hold at least one chunk ({})",
                self.sink_capacity, self.chunk_size
            )));
        }
        if self.connect_attempts == 0 {
            return Err(FanoutError::invalid_config(
                "connect_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}
