//! Consumer registry and reader loop state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::sink::{SinkBuffer, SinkId};
use crate::source::ConsumerPresence;

/// Lifecycle of the reader loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderState {
    Stopped,
    Running,
}

struct RegistryState {
    sinks: HashMap<SinkId, Arc<SinkBuffer>>,
    reader: ReaderState,
}

/// The set of live sinks.
///
/// Membership and the reader loop's state share one lock, so a `register`
/// racing with the loop deciding to stop either keeps the old loop alive or
/// starts a new one, never neither and never both.
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
    emptied: Notify,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sinks: HashMap::new(),
                reader: ReaderState::Stopped,
            }),
            emptied: Notify::new(),
        }
    }

    /// Adds a sink.
    ///
    /// Returns `true` when the reader loop was stopped and the caller must
    /// start it.
    pub fn register(&self, sink: Arc<SinkBuffer>) -> bool {
        let mut state = self.state.lock();
        state.sinks.insert(sink.id(), sink);
        if state.reader == ReaderState::Stopped {
            state.reader = ReaderState::Running;
            true
        } else {
            false
        }
    }

    /// Removes a sink, returning how many remain, or `None` if it was not
    /// registered.
    ///
    /// Wakes the reader loop when the last sink leaves.
    pub fn unregister(&self, id: SinkId) -> Option<usize> {
        let remaining = {
            let mut state = self.state.lock();
            state.sinks.remove(&id)?;
            state.sinks.len()
        };
        if remaining == 0 {
            self.emptied.notify_one();
        }
        Some(remaining)
    }

    /// Copies out the current sinks so writes happen without the lock.
    pub fn snapshot(&self) -> Vec<Arc<SinkBuffer>> {
        self.state.lock().sinks.values().cloned().collect()
    }

    /// Called by the reader loop before each pass.
    ///
    /// Returns `false`, having marked the loop stopped, once no sinks remain.
    pub fn continue_or_stop(&self) -> bool {
        let mut state = self.state.lock();
        if state.sinks.is_empty() {
            state.reader = ReaderState::Stopped;
            false
        } else {
            true
        }
    }

    /// Resolves after the registry became empty.
    ///
    /// May also resolve spuriously; callers re-check with
    /// [`continue_or_stop`](Self::continue_or_stop).
    pub async fn emptied(&self) {
        self.emptied.notified().await;
    }

    /// Removes every sink and closes its write end, returning how many
    /// were removed. Readers drain what is buffered, then see end-of-stream.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.sinks.drain().map(|(_, sink)| sink).collect()
        };
        for sink in &drained {
            sink.close_write();
        }
        self.emptied.notify_one();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().sinks.is_empty()
    }

    pub fn reader_state(&self) -> ReaderState {
        self.state.lock().reader
    }
}

impl ConsumerPresence for Registry {
    fn has_consumers(&self) -> bool {
        !self.is_empty()
    }
}
