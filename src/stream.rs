//! Consumer-facing live stream handle.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::poll_fn;
use tokio::io::{AsyncRead, ReadBuf};

use crate::sink::{SinkBuffer, SinkId};
use crate::{AudioFormat, FanoutError};

/// Receives lifecycle notifications from a [`LiveStream`].
///
/// The stream does not know what the engine does with these; it only reports
/// that it was read from or is going away.
pub(crate) trait StreamObserver: Send + Sync {
    /// `idle = false` before every read, `idle = true` on close.
    fn on_activity(&self, idle: bool);

    /// The read end of `sink` was released. Called once per stream.
    fn on_release(&self, sink: SinkId);
}

/// A live copy of the upstream audio.
///
/// Returned by [`FanoutEngine::acquire_stream()`]. Each stream has a private
/// buffer that the engine fills; reading drains it. Bytes arrive in upstream
/// order starting from the moment the stream was acquired.
///
/// Closing (or dropping) the stream detaches it from the engine. Once the
/// last stream closes the engine schedules an idle disconnect.
///
/// `LiveStream` also implements [`AsyncRead`], so it can be used with
/// `tokio::io::copy` and friends.
///
/// # Example
///
/// ```ignore
/// let mut stream = engine.acquire_stream(&AudioFormat::any()).await?;
/// let mut buf = [0u8; 4096];
/// let n = stream.read(&mut buf).await?;
/// stream.close();
/// ```
///
/// [`FanoutEngine::acquire_stream()`]: crate::FanoutEngine::acquire_stream
pub struct LiveStream {
    format: AudioFormat,
    sink: Arc<SinkBuffer>,
    observer: Arc<dyn StreamObserver>,
    closed: bool,
}

impl LiveStream {
    pub(crate) fn new(
        format: AudioFormat,
        sink: Arc<SinkBuffer>,
        observer: Arc<dyn StreamObserver>,
    ) -> Self {
        Self {
            format,
            sink,
            observer,
            closed: false,
        }
    }

    /// The format of the bytes this stream yields.
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Identifier of this stream's sink.
    pub fn id(&self) -> SinkId {
        self.sink.id()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes received but not yet read.
    pub fn buffered(&self) -> usize {
        self.sink.buffered()
    }

    /// Total bytes this stream lost because it fell behind.
    pub fn dropped_bytes(&self) -> u64 {
        self.sink.dropped_total()
    }

    /// Reads audio into `buf`, waiting until some is available.
    ///
    /// Returns `Ok(0)` when the engine has shut down and everything buffered
    /// has been read.
    ///
    /// # Errors
    ///
    /// [`FanoutError::ClosedStream`] if the stream was closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FanoutError> {
        if self.closed {
            return Err(FanoutError::ClosedStream);
        }
        tracing::trace!(sink = %self.sink.id(), "reading from live stream");
        self.observer.on_activity(false);

        let sink = &self.sink;
        Ok(poll_fn(|cx| sink.poll_read(cx, buf)).await)
    }

    /// Detaches the stream from the engine. Safe to call more than once.
    pub fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        self.observer.on_activity(true);
        self.sink.release();
        self.observer.on_release(self.sink.id());
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("id", &self.sink.id())
            .field("format", &self.format)
            .field("closed", &self.closed)
            .finish()
    }
}

impl AsyncRead for LiveStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(FanoutError::ClosedStream.into()));
        }
        this.observer.on_activity(false);

        match this.sink.poll_read(cx, buf.initialize_unfilled()) {
            Poll::Ready(n) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
