//! # Transcription Module
//!
//! Produces placeholder transcription tokens for audio chunks. There is no
//! real speech recognition here: tokens are derived from chunk size and a
//! running chunk counter, and latency is simulated with fixed delays.
//!
//! ## Key Components:
//! - **Processor**: pure chunk → token mapping plus the chunk counter
//! - **Pipeline**: delayed single-shot, continuous and word-by-word execution

pub mod pipeline;
pub mod processor;

pub use pipeline::{PipelineTiming, TranscriptionPipeline};
pub use processor::ChunkCounter;
