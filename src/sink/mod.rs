//! Per-consumer sinks.
//!
//! Every [`LiveStream`](crate::LiveStream) owns the read end of one sink. The
//! reader loop holds the write end of every registered sink and copies each
//! upstream chunk into all of them.
//!
//! Sinks are bounded. A consumer that stops reading never stalls the reader
//! loop: once its buffer is full the oldest bytes are discarded to make room
//! for fresh audio.

mod buffer;

pub(crate) use buffer::SinkBuffer;

use std::fmt;

/// Identifier of one consumer's sink within an engine.
///
/// # Example
///
/// ```
/// use stream_fanout::SinkId;
///
/// assert_eq!(SinkId::new(7).to_string(), "sink-7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    /// Creates a sink ID from a raw number.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}
