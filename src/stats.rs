//! Engine statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Upstream connections opened.
    pub connects: u64,
    /// Upstream connections closed, for any reason.
    pub disconnects: u64,
    /// Non-empty chunks read from the upstream.
    pub chunks_read: u64,
    /// Bytes read from the upstream.
    pub bytes_read: u64,
    /// Failed, timed out, or end-of-stream upstream reads.
    pub read_errors: u64,
    /// Bytes discarded because a consumer fell behind.
    pub overflow_bytes: u64,
}

/// Internal counters shared between the engine and background tasks.
#[derive(Debug, Default)]
pub(crate) struct StatsState {
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
    pub chunks_read: AtomicU64,
    pub bytes_read: AtomicU64,
    pub read_errors: AtomicU64,
    pub overflow_bytes: AtomicU64,
}

impl StatsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_overflow(&self, bytes: usize) {
        self.overflow_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            connects: self.connects.load(Ordering::SeqCst),
            disconnects: self.disconnects.load(Ordering::SeqCst),
            chunks_read: self.chunks_read.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            read_errors: self.read_errors.load(Ordering::SeqCst),
            overflow_bytes: self.overflow_bytes.load(Ordering::SeqCst),
        }
    }
}
