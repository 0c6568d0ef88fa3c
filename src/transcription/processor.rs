//! # Chunk Processor
//!
//! Maps one binary audio chunk to a placeholder transcription token.
//! The token depends only on the chunk length and the value of a chunk
//! counter, so the same `(length, count)` pair always yields the same token.
//!
//! ## Length bands:
//! - `< 100` bytes: `"[Silence]"`
//! - `< 500` bytes: `"Listening..."`
//! - `< 1500` bytes: `"Processing speech..."`
//! - `< 3000` bytes: `"Hello"`
//! - `>= 3000` bytes: one of three sentences, picked by `count % 10`

use std::sync::atomic::{AtomicU64, Ordering};

pub const SILENCE: &str = "[Silence]";
pub const LISTENING: &str = "Listening...";
pub const PROCESSING: &str = "Processing speech...";
pub const GREETING_WORD: &str = "Hello";
pub const SENTENCE_SHORT: &str = "Hello, this is";
pub const SENTENCE_MEDIUM: &str = "Hello, this is live";
pub const SENTENCE_FULL: &str = "Hello, this is live transcription working in real-time";

/// Monotonically increasing chunk counter.
///
/// ## Sharing:
/// The counter is an explicit object rather than a hidden static. The
/// pipeline owns one shared instance; sessions configured for per-session
/// counting get their own instance instead.
#[derive(Debug, Default)]
pub struct ChunkCounter {
    value: AtomicU64,
}

impl ChunkCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new value (the first call returns 1).
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Stateless token producer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkProcessor;

impl ChunkProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Produce the token for a chunk given an already-advanced counter value.
    ///
    /// Empty chunks are valid and fall into the silence band.
    pub fn process(&self, chunk: &[u8], count: u64) -> &'static str {
        match chunk.len() {
            len if len < 100 => SILENCE,
            len if len < 500 => LISTENING,
            len if len < 1500 => PROCESSING,
            len if len < 3000 => GREETING_WORD,
            _ => match count % 10 {
                0..=2 => SENTENCE_SHORT,
                3..=5 => SENTENCE_MEDIUM,
                _ => SENTENCE_FULL,
            },
        }
    }

    /// Advance `counter` once and produce the token for `chunk`.
    pub fn process_counted(&self, chunk: &[u8], counter: &ChunkCounter) -> &'static str {
        let count = counter.next();
        self.process(chunk, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> Vec<u8> {
        vec![0u8; len]
    }

    #[test]
    fn test_length_band_boundaries() {
        let processor = ChunkProcessor::new();
        let cases = [
            (0, SILENCE),
            (99, SILENCE),
            (100, LISTENING),
            (499, LISTENING),
            (500, PROCESSING),
            (1499, PROCESSING),
            (1500, GREETING_WORD),
            (2999, GREETING_WORD),
            (3000, SENTENCE_SHORT),
        ];

        for (len, expected) in cases {
            assert_eq!(processor.process(&chunk(len), 0), expected, "length {}", len);
        }
    }

    #[test]
    fn test_large_chunk_uses_count_mod_ten() {
        let processor = ChunkProcessor::new();
        let large = chunk(4000);

        for count in 0..30u64 {
            let expected = match count % 10 {
                0 | 1 | 2 => SENTENCE_SHORT,
                3 | 4 | 5 => SENTENCE_MEDIUM,
                _ => SENTENCE_FULL,
            };
            assert_eq!(processor.process(&large, count), expected, "count {}", count);
        }
    }

    #[test]
    fn test_small_chunks_ignore_count() {
        let processor = ChunkProcessor::new();
        for count in [0, 3, 7, 1_000_001] {
            assert_eq!(processor.process(&chunk(2000), count), GREETING_WORD);
            assert_eq!(processor.process(&chunk(10), count), SILENCE);
        }
    }

    #[test]
    fn test_counter_starts_at_one() {
        let counter = ChunkCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_process_counted_advances_counter() {
        let processor = ChunkProcessor::new();
        let counter = ChunkCounter::new();

        // counts 1 and 2 land in the short band, 3 moves to the medium one
        assert_eq!(processor.process_counted(&chunk(3500), &counter), SENTENCE_SHORT);
        assert_eq!(processor.process_counted(&chunk(3500), &counter), SENTENCE_SHORT);
        assert_eq!(processor.process_counted(&chunk(3500), &counter), SENTENCE_MEDIUM);
        assert_eq!(counter.current(), 3);
    }
}
