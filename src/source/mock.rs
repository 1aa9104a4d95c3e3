//! In-memory connector for testing without an audio server.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use crate::source::{Connector, Upstream};

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

enum Step {
    Fail(io::ErrorKind),
    Stall,
    Delay(Duration),
}

/// A [`Connector`] that hands out in-memory pipes.
///
/// Every successful connect creates a new pipe. The engine gets the read
/// end; the write end is queued as a [`MockUpstream`] for the test to feed.
/// Failures and stalls can be scripted ahead of time.
///
/// # Example
///
/// ```
/// use stream_fanout::MockConnector;
/// use std::io::ErrorKind;
///
/// let connector = MockConnector::new();
/// connector.fail_next(ErrorKind::ConnectionRefused);
/// assert_eq!(connector.attempts(), 0);
/// ```
pub struct MockConnector {
    script: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
    connections: AtomicUsize,
    accepted_tx: mpsc::UnboundedSender<MockUpstream>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockUpstream>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Creates a connector whose connects all succeed.
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        }
    }

    /// Makes the next unscripted connect fail with `kind`.
    pub fn fail_next(&self, kind: io::ErrorKind) {
        self.script.lock().push_back(Step::Fail(kind));
    }

    /// Makes the next `times` unscripted connects fail with `kind`.
    pub fn fail_times(&self, times: usize, kind: io::ErrorKind) {
        let mut script = self.script.lock();
        for _ in 0..times {
            script.push_back(Step::Fail(kind));
        }
    }

    /// Makes the next unscripted connect hang forever.
    pub fn stall_next(&self) {
        self.script.lock().push_back(Step::Stall);
    }

    /// Makes the next unscripted connect succeed only after `delay`.
    pub fn delay_next(&self, delay: Duration) {
        self.script.lock().push_back(Step::Delay(delay));
    }

    /// Number of connect calls so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of successful connects so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Waits for the write end of the next successful connection.
    pub async fn next_upstream(&self) -> Option<MockUpstream> {
        self.accepted_rx.lock().await.recv().await
    }

    fn open_pipe(&self) -> Upstream {
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.connections.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as `self`.
        let _ = self.accepted_tx.send(MockUpstream { writer: server });
        Box::new(client)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<Upstream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted connect failure")),
            Some(Step::Stall) => futures::future::pending().await,
            Some(Step::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.open_pipe())
            }
            None => Ok(self.open_pipe()),
        }
    }
}

/// The server side of a [`MockConnector`] connection.
///
/// Dropping it (or calling [`close`](MockUpstream::close)) makes the engine
/// see end-of-stream.
pub struct MockUpstream {
    writer: DuplexStream,
}

impl MockUpstream {
    /// Sends raw audio bytes to the engine.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Closes the upstream side of the connection.
    pub fn close(self) {}
}
