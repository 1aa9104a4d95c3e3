//! # stream-fanout
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Shares one raw network audio stream among many consumers.
//!
//! `stream-fanout` connects to an audio server that streams raw PCM over TCP
//! (such as a PulseAudio simple-protocol module), reads it once, and hands an
//! independent copy to every open [`LiveStream`]. The connection is opened on
//! demand and closed again after an idle delay.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stream_fanout::{AudioFormat, FanoutEngine, StaticSource};
//!
//! let engine = FanoutEngine::builder()
//!     .source(StaticSource::new("192.168.1.20", 4712)
//!         .with_format(AudioFormat::pcm_signed(16_000, 16, 1)))
//!     .on_event(|e| tracing::warn!(?e, "stream event"))
//!     .build()?;
//!
//! let mut stream = engine.acquire_stream(&AudioFormat::any()).await?;
//! let mut buf = [0u8; 4096];
//! while stream.read(&mut buf).await? > 0 {
//!     // Send to a recognizer, a file, etc.
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Connection manager**: owns the single upstream connection and its
//!   idle timer
//! - **Reader loop**: one task per engine, running only while streams exist
//! - **Sinks**: a bounded ring per stream; a slow consumer loses its oldest
//!   audio instead of stalling the others
//!
//! Locks guarding shared state are never held across an `.await`, so a
//! consumer closing its stream never waits on network I/O.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod engine;
mod error;
mod event;
pub mod format;
mod pipeline;
mod sink;
pub mod source;
mod stats;
mod stream;

pub use builder::FanoutEngineBuilder;
pub use config::{EngineConfig, DEFAULT_CHUNK_SIZE, DEFAULT_SINK_CAPACITY};
pub use engine::FanoutEngine;
pub use error::{FanoutError, SinkError};
pub use event::{event_callback, DisconnectReason, EventCallback, StreamEvent};
pub use format::{AudioFormat, Encoding};
pub use sink::SinkId;
pub use source::{
    Connector, MockConnector, MockUpstream, SourceDescriptor, StaticSource, TcpConnector, Upstream,
};
pub use stats::EngineStats;
pub use stream::LiveStream;
