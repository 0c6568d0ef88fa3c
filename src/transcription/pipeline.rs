//! # Transcription Pipeline
//!
//! Wraps the [`ChunkProcessor`] with simulated latency and exposes three
//! execution modes:
//!
//! - **Once**: one chunk in, one token out after a fixed delay.
//! - **Stream**: a sequence of chunks in, a lazy stream of tokens out with
//!   consecutive duplicates suppressed and each emission throttled.
//! - **Progressive**: one chunk in, the token's cumulative word prefixes out,
//!   one per word delay.
//!
//! ## Counters:
//! Every entry point takes the [`ChunkCounter`] to advance explicitly. The
//! pipeline owns a shared counter (see [`TranscriptionPipeline::shared_counter`])
//! that callers use when counting globally across sessions.

use crate::error::StreamError;
use crate::transcription::processor::{ChunkCounter, ChunkProcessor};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Simulated latencies for each execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTiming {
    /// Delay before a single-chunk result is delivered
    pub once_delay: Duration,
    /// Delay applied to every emission of a continuous stream
    pub stream_delay: Duration,
    /// Delay between cumulative word prefixes
    pub word_delay: Duration,
}

impl Default for PipelineTiming {
    fn default() -> Self {
        Self {
            once_delay: Duration::from_millis(50),
            stream_delay: Duration::from_millis(100),
            word_delay: Duration::from_millis(200),
        }
    }
}

/// Remembers the last value let through and rejects an identical successor.
#[derive(Debug)]
pub struct DistinctUntilChanged<T> {
    last: Option<T>,
}

impl<T: PartialEq + Clone> DistinctUntilChanged<T> {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Returns the value if it differs from the previously admitted one.
    pub fn admit(&mut self, value: T) -> Option<T> {
        if self.last.as_ref() == Some(&value) {
            return None;
        }
        self.last = Some(value.clone());
        Some(value)
    }
}

impl<T: PartialEq + Clone> Default for DistinctUntilChanged<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TranscriptionPipeline {
    processor: ChunkProcessor,
    counter: Arc<ChunkCounter>,
    timing: PipelineTiming,
}

impl TranscriptionPipeline {
    pub fn new(timing: PipelineTiming) -> Self {
        Self {
            processor: ChunkProcessor::new(),
            counter: Arc::new(ChunkCounter::new()),
            timing,
        }
    }

    /// Counter shared by every session that counts globally.
    pub fn shared_counter(&self) -> Arc<ChunkCounter> {
        self.counter.clone()
    }

    /// Transcribe a single chunk.
    ///
    /// The counter is advanced immediately; the token is returned after
    /// `once_delay`. Callers spawn this on a worker task and must re-check
    /// session liveness before using the result.
    pub async fn transcribe_once(
        &self,
        chunk: &[u8],
        counter: &ChunkCounter,
    ) -> Result<String, StreamError> {
        let token = self.processor.process_counted(chunk, counter);
        tokio::time::sleep(self.timing.once_delay).await;
        Ok(token.to_string())
    }

    /// Transcribe a sequence of chunks into a throttled, de-duplicated stream.
    ///
    /// ## Semantics:
    /// - Each chunk advances the counter exactly once, even when its token is
    ///   suppressed as a duplicate.
    /// - A token is emitted only if it differs from the previously emitted one.
    /// - Each emission waits `stream_delay`, so delivery is paced independently
    ///   of how fast chunks arrive.
    /// - The stream ends when the input ends; restarting means calling this again.
    pub fn transcribe_stream<S, B>(
        &self,
        chunks: S,
        counter: Arc<ChunkCounter>,
    ) -> BoxStream<'static, String>
    where
        S: Stream<Item = B> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
    {
        let processor = self.processor;
        let delay = self.timing.stream_delay;
        let mut distinct = DistinctUntilChanged::new();

        chunks
            .map(move |chunk| processor.process_counted(chunk.as_ref(), &counter))
            .filter_map(move |token| futures_util::future::ready(distinct.admit(token)))
            .then(move |token| async move {
                tokio::time::sleep(delay).await;
                token.to_string()
            })
            .boxed()
    }

    /// Emit the token for one chunk word by word as growing prefixes.
    ///
    /// `"Hello, this is"` yields `"Hello,"`, `"Hello, this"`, `"Hello, this is"`.
    pub fn transcribe_progressive(
        &self,
        chunk: &[u8],
        counter: &ChunkCounter,
    ) -> BoxStream<'static, String> {
        let token = self.processor.process_counted(chunk, counter);
        let delay = self.timing.word_delay;

        stream::iter(word_prefixes(token))
            .then(move |prefix| async move {
                tokio::time::sleep(delay).await;
                prefix
            })
            .boxed()
    }
}

fn word_prefixes(token: &str) -> Vec<String> {
    token
        .split(' ')
        .scan(String::new(), |acc, word| {
            if !acc.is_empty() {
                acc.push(' ');
            }
            acc.push_str(word);
            Some(acc.clone())
        })
        .collect()
}
