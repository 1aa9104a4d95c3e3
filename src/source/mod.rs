//! Upstream audio source: descriptor, transport, and connection lifecycle.
//!
//! A [`SourceDescriptor`] is supplied by the framework that owns the audio
//! device. It provides where to connect and what the stream looks like; the
//! engine never asks it for bytes. Bytes come through a [`Connector`].

mod connection;
mod connector;
mod mock;

pub(crate) use connection::{Connection, ConnectionManager};
pub use connector::{Connector, TcpConnector, Upstream};
pub use mock::{MockConnector, MockUpstream};

use crate::AudioFormat;

/// Connection parameters and format metadata for one upstream source.
///
/// Values are read on every connect, so an implementation backed by live
/// device configuration takes effect on the next reconnect.
pub trait SourceDescriptor: Send + Sync {
    /// Host name or address of the audio server.
    fn host(&self) -> &str;

    /// TCP port of the raw audio stream.
    fn port(&self) -> u16;

    /// Format of the bytes the source sends, if known.
    fn source_format(&self) -> Option<AudioFormat>;
}

/// Tells the connection manager whether any consumer is attached.
pub(crate) trait ConsumerPresence: Send + Sync {
    fn has_consumers(&self) -> bool;
}

/// A [`SourceDescriptor`] with fixed values.
///
/// # Example
///
/// ```
/// use stream_fanout::{AudioFormat, SourceDescriptor, StaticSource};
///
/// let source = StaticSource::new("192.168.1.20", 4712)
///     .with_format(AudioFormat::pcm_signed(16_000, 16, 1));
/// assert_eq!(source.port(), 4712);
/// ```
#[derive(Debug, Clone)]
pub struct StaticSource {
    host: String,
    port: u16,
    format: Option<AudioFormat>,
}

impl StaticSource {
    /// Creates a descriptor for `host:port` with no declared format.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            format: None,
        }
    }

    /// Declares the format the source sends.
    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = Some(format);
        self
    }
}

impl SourceDescriptor for StaticSource {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn source_format(&self) -> Option<AudioFormat> {
        self.format.clone()
    }
}
