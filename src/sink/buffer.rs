//! Bounded byte ring shared by the reader loop and one consumer.

use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use crate::sink::SinkId;
use crate::SinkError;

struct SinkRing {
    rb: HeapRb<u8>,
    closed: bool,
    dropped_total: u64,
}

/// A single consumer's buffer.
///
/// Writes never block: when a write does not fit, the oldest buffered bytes
/// are skipped, rounded up to whole frames so a consumer never resumes in the
/// middle of a sample.
pub(crate) struct SinkBuffer {
    id: SinkId,
    frame_bytes: usize,
    ring: Mutex<SinkRing>,
    waker: AtomicWaker,
}

impl SinkBuffer {
    /// Creates a buffer holding up to `capacity` bytes.
    ///
    /// `frame_bytes` is the alignment used when dropping old audio.
    pub fn new(id: SinkId, capacity: usize, frame_bytes: usize) -> Self {
        Self {
            id,
            frame_bytes: frame_bytes.max(1),
            ring: Mutex::new(SinkRing {
                rb: HeapRb::new(capacity.max(1)),
                closed: false,
                dropped_total: 0,
            }),
            waker: AtomicWaker::new(),
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Appends `bytes`, returning how many old bytes were discarded.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, SinkError> {
        let dropped = {
            let mut ring = self.ring.lock();
            if ring.closed {
                return Err(SinkError::Closed);
            }

            let capacity = ring.rb.capacity().get();
            let mut data = bytes;
            let mut dropped = 0;

            if data.len() > capacity {
                // Only the newest `capacity` bytes can survive.
                let excess = round_up(data.len() - capacity, self.frame_bytes).min(data.len());
                data = &data[excess..];
                dropped += excess + ring.rb.clear();
            }

            let vacant = ring.rb.vacant_len();
            if data.len() > vacant {
                let occupied = ring.rb.occupied_len();
                let need = round_up(data.len() - vacant, self.frame_bytes).min(occupied);
                dropped += ring.rb.skip(need);
            }

            let pushed = ring.rb.push_slice(data);
            debug_assert_eq!(pushed, data.len());
            ring.dropped_total += dropped as u64;
            dropped
        };

        self.waker.wake();
        Ok(dropped)
    }

    /// Copies buffered bytes into `buf`.
    ///
    /// Resolves to `0` only once the sink is closed and drained.
    pub fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<usize> {
        if buf.is_empty() {
            return Poll::Ready(0);
        }

        // Register before checking so a concurrent write cannot be missed.
        self.waker.register(cx.waker());

        let mut ring = self.ring.lock();
        let n = ring.rb.pop_slice(buf);
        if n > 0 {
            return Poll::Ready(n);
        }
        if ring.closed {
            return Poll::Ready(0);
        }
        Poll::Pending
    }

    /// Stops accepting writes but lets the reader drain what is buffered.
    pub fn close_write(&self) {
        self.ring.lock().closed = true;
        self.waker.wake();
    }

    /// Closes both ends and discards anything still buffered.
    pub fn release(&self) {
        {
            let mut ring = self.ring.lock();
            ring.closed = true;
            ring.rb.clear();
        }
        self.waker.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    /// Bytes waiting to be read.
    pub fn buffered(&self) -> usize {
        self.ring.lock().rb.occupied_len()
    }

    /// Total bytes discarded by overflow since creation.
    pub fn dropped_total(&self) -> u64 {
        self.ring.lock().dropped_total
    }
}

fn round_up(n: usize, multiple: usize) -> usize {
    n.div_ceil(multiple) * multiple
}
