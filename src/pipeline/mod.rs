//! Fan-out pipeline components.
//!
//! ```text
//! Upstream socket → Reader Loop → Sink (per consumer) → LiveStream
//! ```
//!
//! - **Registry**: the set of live sinks and the reader loop's run state
//! - **Reader Loop**: reads one chunk at a time and copies it into every sink
//!
//! The reader loop only reads the registry. Sinks are added by the engine
//! and removed when their stream closes.

mod reader;
mod registry;

pub(crate) use reader::ReaderLoop;
pub(crate) use registry::{ReaderState, Registry};
