//! Runtime events for monitoring fan-out health.
//!
//! Events are non-fatal notifications about engine behavior. The engine
//! continues running after events are emitted - they're for logging/metrics,
//! not error handling.

use std::fmt;
use std::sync::Arc;

use crate::sink::SinkId;

/// Why the upstream connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// An explicit disconnect, e.g. before a connect retry.
    Forced,
    /// The idle timer fired while no consumer was reading.
    Idle,
    /// The reader loop hit end-of-stream or a socket error.
    Lost,
    /// The engine is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Forced => "forced",
            Self::Idle => "idle timeout",
            Self::Lost => "connection lost",
            Self::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Runtime events emitted by the engine.
///
/// These are informational events, not errors. Use the [`EventCallback`]
/// to log these or update metrics.
///
/// # Example
///
/// ```
/// use stream_fanout::StreamEvent;
///
/// fn handle_event(event: StreamEvent) {
///     match event {
///         StreamEvent::Connected { host, port, .. } => {
///             eprintln!("connected to {}:{}", host, port);
///         }
///         StreamEvent::SinkOverflow { sink_id, dropped_bytes } => {
///             eprintln!("{} is too slow, dropped {} bytes", sink_id, dropped_bytes);
///         }
///         other => eprintln!("{:?}", other),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The upstream connection was opened.
    Connected {
        /// Upstream host.
        host: String,
        /// Upstream port.
        port: u16,
        /// Identifier of the new connection.
        connection_id: u64,
    },

    /// A connect attempt failed.
    ConnectFailed {
        /// Upstream host.
        host: String,
        /// Upstream port.
        port: u16,
        /// Description of the failure.
        error: String,
    },

    /// The upstream connection was closed.
    Disconnected {
        /// Identifier of the closed connection.
        connection_id: u64,
        /// Why it was closed.
        reason: DisconnectReason,
    },

    /// An upstream read failed. The reader loop keeps running.
    ReadError {
        /// Description of the failure.
        error: String,
    },

    /// The upstream closed its end of the stream.
    UpstreamClosed {
        /// Identifier of the connection that reached end-of-stream.
        connection_id: u64,
    },

    /// A consumer fell behind and its oldest buffered audio was discarded.
    SinkOverflow {
        /// The sink that overflowed.
        sink_id: SinkId,
        /// Number of bytes dropped.
        dropped_bytes: usize,
    },

    /// A write to a single sink failed.
    SinkError {
        /// The sink that failed.
        sink_id: SinkId,
        /// Description of the failure.
        error: String,
    },

    /// A consumer acquired a stream.
    ConsumerAttached {
        /// The new consumer's sink.
        sink_id: SinkId,
    },

    /// A consumer closed its stream.
    ConsumerDetached {
        /// The departed consumer's sink.
        sink_id: SinkId,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`FanoutEngineBuilder::on_event()`].
///
/// [`FanoutEngineBuilder::on_event()`]: crate::FanoutEngineBuilder::on_event
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_fanout::{event_callback, StreamEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Optional callback with a no-op default.
#[derive(Clone, Default)]
pub(crate) struct EventSink(Option<EventCallback>);

impl EventSink {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self(callback)
    }

    pub fn emit(&self, event: StreamEvent) {
        if let Some(ref callback) = self.0 {
            callback(event);
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventSink")
            .field(&self.0.as_ref().map(|_| "callback"))
            .finish()
    }
}
