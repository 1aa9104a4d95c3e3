//! Error types for stream-fanout.
//!
//! Errors are split into two categories:
//! - **Caller-facing errors** ([`FanoutError`]): returned from
//!   [`FanoutEngine::acquire_stream()`](crate::FanoutEngine::acquire_stream)
//!   and [`LiveStream::read()`](crate::LiveStream::read)
//! - **Per-sink errors** ([`SinkError`]): recoverable fan-out failures that the
//!   reader loop logs and surfaces via [`EventCallback`](crate::EventCallback)

use std::io;

use crate::AudioFormat;

/// Errors surfaced to consumers of the engine.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    /// The upstream transport could not be connected or failed during I/O.
    #[error("connection to {host}:{port} failed: {source}")]
    Connection {
        /// Upstream host.
        host: String,
        /// Upstream port.
        port: u16,
        /// The underlying transport error.
        #[source]
        source: io::Error,
    },

    /// A wait was interrupted, either by engine shutdown or by the transport.
    #[error("interrupted while waiting for the audio source")]
    Interrupted,

    /// The requested format is not compatible with the source format.
    #[error("incompatible audio format requested: {requested} (source provides {source_format})")]
    FormatMismatch {
        /// What the consumer asked for.
        requested: AudioFormat,
        /// What the source declares.
        source_format: AudioFormat,
    },

    /// The stream handle has already been closed.
    #[error("stream is closed")]
    ClosedStream,

    /// No input could be obtained from the source.
    #[error("audio source unavailable: {reason}")]
    UnavailableSource {
        /// Why the source is unavailable.
        reason: String,
    },

    /// The engine was built with an unusable configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl FanoutError {
    /// Creates a connection error for the given endpoint.
    pub fn connection(host: impl Into<String>, port: u16, source: io::Error) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            source,
        }
    }

    /// Creates an unavailable source error with the given reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::UnavailableSource {
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error with the given reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` for transport failures worth a reconnect attempt.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<FanoutError> for io::Error {
    fn from(err: FanoutError) -> Self {
        let kind = match &err {
            FanoutError::Connection { source, .. } => source.kind(),
            FanoutError::Interrupted => io::ErrorKind::Interrupted,
            FanoutError::ClosedStream => io::ErrorKind::NotConnected,
            FanoutError::FormatMismatch { .. } | FanoutError::InvalidConfig { .. } => {
                io::ErrorKind::InvalidInput
            }
            FanoutError::UnavailableSource { .. } => io::ErrorKind::NotFound,
        };
        io::Error::new(kind, err)
    }
}

/// Errors that can occur while writing into a single consumer's sink.
///
/// Sink errors are recoverable: the reader loop emits a
/// [`StreamEvent::SinkError`](crate::StreamEvent::SinkError) and keeps serving
/// the other sinks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The consumer closed its stream before the write landed.
    #[error("sink closed")]
    Closed,
}
