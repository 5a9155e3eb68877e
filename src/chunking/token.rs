//! Fixed-window splitting by token count.

use std::sync::Arc;

use super::{Chunk, TextSplitter, Tokenizer, assemble_chunks, clamp_overlap};

/// Slides a window of `chunk_size` tokens across the text, stepping by
/// `chunk_size - overlap`. Ignores document structure entirely.
pub struct TokenSplitter {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    overlap: usize,
}

impl TokenSplitter {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tokenizer,
            chunk_size,
            overlap: clamp_overlap(chunk_size, overlap),
        }
    }
}

impl TextSplitter for TokenSplitter {
    fn chunks(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let spans = self.tokenizer.tokenize(text);
        let step = self.chunk_size - self.overlap;

        // First window takes a full budget; later ones add `step` new tokens
        let mut ranges = Vec::new();
        let mut start = 0;
        let mut next = self.chunk_size;
        while next < spans.len() {
            let cut = spans[next].start;
            ranges.push(start..cut);
            start = cut;
            next += step;
        }
        ranges.push(start..text.len());

        assemble_chunks(
            text,
            &ranges,
            self.tokenizer.as_ref(),
            self.chunk_size,
            self.overlap,
        )
    }
}
