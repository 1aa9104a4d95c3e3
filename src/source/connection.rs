//! Upstream connection lifecycle.
//!
//! The [`ConnectionManager`] owns at most one live [`Connection`]. It connects
//! lazily, tears the connection down after an idle delay, and lets the
//! reader loop drop a connection that went bad so the next read reconnects.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::event::{DisconnectReason, EventSink};
use crate::source::{ConsumerPresence, Connector, SourceDescriptor, Upstream};
use crate::stats::StatsState;
use crate::{FanoutError, StreamEvent};

/// One open upstream connection.
pub(crate) struct Connection {
    id: u64,
    reader: tokio::sync::Mutex<Upstream>,
    closed: watch::Sender<bool>,
}

impl Connection {
    fn new(id: u64, upstream: Upstream) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            reader: tokio::sync::Mutex::new(upstream),
            closed,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Reads from the upstream.
    ///
    /// Fails with [`io::ErrorKind::ConnectionAborted`] if the connection is
    /// closed before or during the read.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(aborted());
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            result = reader.read(buf) => result,
            _ = closed.changed() => Err(aborted()),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

struct PendingDisconnect {
    seq: u64,
    handle: JoinHandle<()>,
}

struct ConnectionState {
    live: Option<Arc<Connection>>,
    last_activity: Option<Instant>,
    idle: bool,
    timer: Option<PendingDisconnect>,
    timer_seq: u64,
    runtime: Option<Handle>,
}

impl ConnectionState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

/// Owns the single upstream connection of an engine.
pub(crate) struct ConnectionManager {
    source: Arc<dyn SourceDescriptor>,
    connector: Arc<dyn Connector>,
    // Consulted under `state`; never locks `state` itself.
    consumers: Arc<dyn ConsumerPresence>,
    connect_timeout: Duration,
    state: Mutex<ConnectionState>,
    // Serializes connects; never held together with `state`.
    connect_lock: tokio::sync::Mutex<()>,
    interrupt: watch::Sender<bool>,
    next_id: AtomicU64,
    stats: Arc<StatsState>,
    events: EventSink,
    this: Weak<ConnectionManager>,
}

impl ConnectionManager {
    pub fn new(
        source: Arc<dyn SourceDescriptor>,
        connector: Arc<dyn Connector>,
        consumers: Arc<dyn ConsumerPresence>,
        connect_timeout: Duration,
        stats: Arc<StatsState>,
        events: EventSink,
    ) -> Arc<Self> {
        let (interrupt, _) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            source,
            connector,
            consumers,
            connect_timeout,
            state: Mutex::new(ConnectionState {
                live: None,
                last_activity: None,
                idle: true,
                timer: None,
                timer_seq: 0,
                runtime: None,
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            interrupt,
            next_id: AtomicU64::new(0),
            stats,
            events,
            this: this.clone(),
        })
    }

    /// Returns the live connection, opening one if there is none.
    ///
    /// Cancels any pending idle disconnect.
    pub async fn connect_if_needed(&self) -> Result<Arc<Connection>, FanoutError> {
        self.connect(true).await
    }

    /// Returns the live connection without touching the idle timer,
    /// reconnecting only when there is none.
    pub async fn live_input(&self) -> Result<Arc<Connection>, FanoutError> {
        let live = self.state.lock().live.clone();
        match live {
            Some(conn) => Ok(conn),
            None => self.connect(false).await,
        }
    }

    async fn connect(&self, cancel_timer: bool) -> Result<Arc<Connection>, FanoutError> {
        let mut interrupted = self.interrupt.subscribe();
        if *interrupted.borrow_and_update() {
            return Err(FanoutError::Interrupted);
        }

        let _connecting = tokio::select! {
            guard = self.connect_lock.lock() => guard,
            _ = interrupted.changed() => return Err(FanoutError::Interrupted),
        };

        {
            let mut state = self.state.lock();
            if state.runtime.is_none() {
                state.runtime = Some(Handle::current());
            }
            if let Some(conn) = state.live.clone() {
                if cancel_timer {
                    state.cancel_timer();
                }
                state.last_activity = Some(Instant::now());
                return Ok(conn);
            }
        }

        let host = self.source.host().to_string();
        let port = self.source.port();
        tracing::debug!(%host, port, "connecting to audio source");

        let attempt = tokio::time::timeout(self.connect_timeout, self.connector.connect(&host, port));
        let result = tokio::select! {
            result = attempt => result,
            _ = interrupted.changed() => return Err(FanoutError::Interrupted),
        };

        let upstream = match result {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                return Err(FanoutError::Interrupted);
            }
            Ok(Err(e)) => return Err(self.connect_failed(host, port, e)),
            Err(_) => {
                let e = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.connect_timeout),
                );
                return Err(self.connect_failed(host, port, e));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Arc::new(Connection::new(id, upstream));
        {
            let mut state = self.state.lock();
            if cancel_timer {
                state.cancel_timer();
            }
            state.live = Some(Arc::clone(&conn));
            state.last_activity = Some(Instant::now());
        }

        StatsState::incr(&self.stats.connects);
        tracing::info!(%host, port, connection_id = id, "connected to audio source");
        self.events.emit(StreamEvent::Connected {
            host,
            port,
            connection_id: id,
        });
        Ok(conn)
    }

    fn connect_failed(&self, host: String, port: u16, error: io::Error) -> FanoutError {
        tracing::debug!(%host, port, %error, "connect attempt failed");
        self.events.emit(StreamEvent::ConnectFailed {
            host: host.clone(),
            port,
            error: error.to_string(),
        });
        FanoutError::connection(host, port, error)
    }

    /// Closes the live connection, if any, and cancels any pending timer.
    pub fn disconnect(&self, reason: DisconnectReason) {
        let conn = {
            let mut state = self.state.lock();
            state.cancel_timer();
            state.last_activity = None;
            state.live.take()
        };
        if let Some(conn) = conn {
            self.closed(&conn, reason);
        }
    }

    /// Closes the connection only if `connection_id` is still the live one.
    pub fn invalidate(&self, connection_id: u64) {
        let conn = {
            let mut state = self.state.lock();
            match state.live {
                Some(ref live) if live.id() == connection_id => {
                    state.cancel_timer();
                    state.last_activity = None;
                    state.live.take()
                }
                _ => None,
            }
        };
        if let Some(conn) = conn {
            self.closed(&conn, DisconnectReason::Lost);
        }
    }

    fn closed(&self, conn: &Connection, reason: DisconnectReason) {
        conn.close();
        StatsState::incr(&self.stats.disconnects);
        tracing::info!(connection_id = conn.id(), %reason, "disconnected from audio source");
        self.events.emit(StreamEvent::Disconnected {
            connection_id: conn.id(),
            reason,
        });
    }

    /// Arms the idle timer, replacing any pending one.
    ///
    /// With `delay == None` the pending timer is cancelled and nothing is armed.
    pub fn schedule_disconnect(&self, delay: Option<Duration>) {
        let mut state = self.state.lock();
        self.arm_timer(&mut state, delay);
    }

    /// Marks the engine idle and arms the idle timer, but only if no
    /// consumer is attached. Returns whether it did.
    ///
    /// The consumer check and the idle update happen under one lock, so a
    /// consumer attaching concurrently either is seen here or cancels the
    /// timer afterwards through [`mark_busy`](Self::mark_busy).
    pub fn settle_idle(&self, delay: Option<Duration>) -> bool {
        if *self.interrupt.borrow() {
            return false;
        }
        let mut state = self.state.lock();
        if self.consumers.has_consumers() {
            return false;
        }
        state.idle = true;
        self.arm_timer(&mut state, delay);
        true
    }

    /// Marks the engine busy and cancels any pending idle disconnect.
    ///
    /// Called after a consumer has been registered.
    pub fn mark_busy(&self) {
        let mut state = self.state.lock();
        state.idle = false;
        state.cancel_timer();
        if state.live.is_some() {
            state.last_activity = Some(Instant::now());
        }
    }

    fn arm_timer(&self, state: &mut ConnectionState, delay: Option<Duration>) {
        state.cancel_timer();

        let Some(delay) = delay else {
            return;
        };
        // Never connected: nothing to tear down.
        let Some(runtime) = state.runtime.clone() else {
            return;
        };

        state.timer_seq += 1;
        let seq = state.timer_seq;
        let this = self.this.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = this.upgrade() {
                manager.idle_timer_fired(seq);
            }
        });
        state.timer = Some(PendingDisconnect { seq, handle });
        tracing::trace!(?delay, seq, "idle disconnect scheduled");
    }

    fn idle_timer_fired(&self, seq: u64) {
        let conn = {
            let mut state = self.state.lock();
            match state.timer {
                Some(ref timer) if timer.seq == seq => {}
                _ => return,
            }
            state.timer = None;
            if !state.idle || self.consumers.has_consumers() {
                tracing::trace!(seq, "idle timer fired while streams are active");
                return;
            }
            state.last_activity = None;
            state.live.take()
        };
        if let Some(conn) = conn {
            self.closed(&conn, DisconnectReason::Idle);
        }
    }

    /// Records whether any consumer is currently reading.
    pub fn set_idle(&self, idle: bool) {
        let mut state = self.state.lock();
        state.idle = idle;
        if !idle && state.live.is_some() {
            state.last_activity = Some(Instant::now());
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().idle
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().live.is_some()
    }

    pub fn has_pending_disconnect(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.state.lock().last_activity
    }

    /// Fails every current and future connect wait with
    /// [`FanoutError::Interrupted`].
    pub fn interrupt(&self) {
        self.interrupt.send_replace(true);
    }
}
