//! # Streaming Sessions
//!
//! Session bookkeeping for binary-audio-in / text-out connections.
//!
//! ## Key Components:
//! - **Session handle**: per-connection state machine and outbound writer
//! - **Registry**: concurrent table of live sessions
//! - **Handler**: connect / chunk / close / error orchestration

pub mod handle;
pub mod handler;
pub mod registry;

pub use handle::{SessionMode, SessionSummary, TextSink};
pub use handler::StreamingSessionHandler;
pub use registry::SessionRegistry;
