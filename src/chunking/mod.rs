//! Text chunking for embedding.
//!
//! A [`TextSplitter`] turns a document into chunks whose token count stays
//! within a budget. Token counts come from a [`Tokenizer`] capability so the
//! budget matches whatever model will embed the chunks.
//!
//! Chunks are contiguous slices of the source. Chunk `i` may begin with
//! `overlap` bytes carried from chunk `i - 1`; dropping that prefix from every
//! chunk and concatenating the rest reproduces the source exactly.

mod recursive;
mod token;

pub use recursive::RecursiveTokenSplitter;
pub use token::TokenSplitter;

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Default separators, coarse to fine: paragraph, sentence, whitespace.
pub const DEFAULT_SEPARATORS: [&str; 3] = ["\n\n", ". ", " "];

/// Byte range of one token within the tokenized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// Tokenizer capability used to measure and cut chunks.
pub trait Tokenizer: Send + Sync {
    /// Ordered, non-overlapping token spans over `text`.
    fn tokenize(&self, text: &str) -> Vec<TokenSpan>;

    fn count_tokens(&self, text: &str) -> usize {
        self.tokenize(text).len()
    }
}

/// Treats every maximal run of non-whitespace characters as one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<TokenSpan> {
        let mut spans = Vec::new();
        let mut start = None;
        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    spans.push(TokenSpan { start: s, end: i });
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push(TokenSpan {
                start: s,
                end: text.len(),
            });
        }
        spans
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// One chunk of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Byte range of `text` within the source.
    pub range: Range<usize>,
    /// Leading bytes of `text` repeated from the previous chunk.
    pub overlap: usize,
}

impl Chunk {
    /// The part of this chunk not shared with its predecessor.
    pub fn new_content(&self) -> &str {
        &self.text[self.overlap..]
    }
}

/// Splitting strategy capability.
pub trait TextSplitter: Send + Sync {
    /// Splits `text` into ordered chunks with their source ranges.
    fn chunks(&self, text: &str) -> Vec<Chunk>;

    /// Splits `text` into ordered chunk strings.
    fn split(&self, text: &str) -> Vec<String> {
        self.chunks(text).into_iter().map(|c| c.text).collect()
    }
}

/// Selects a splitting strategy from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    #[default]
    Recursive,
    Token,
}

/// Reconstructs the source from chunks by dropping each carried prefix.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::new_content).collect()
}

/// Clamps `overlap` so every chunk keeps at least one token of new content.
pub(crate) fn clamp_overlap(chunk_size: usize, overlap: usize) -> usize {
    overlap.min(chunk_size.saturating_sub(1))
}

/// Turns tiling content ranges into chunks, carrying up to `overlap` trailing
/// tokens of each chunk into the head of the next.
///
/// The carry shrinks whenever it would push a chunk over `budget`.
pub(crate) fn assemble_chunks(
    text: &str,
    ranges: &[Range<usize>],
    tokenizer: &dyn Tokenizer,
    budget: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::with_capacity(ranges.len());

    for range in ranges {
        let mut start = range.start;

        if overlap > 0
            && let Some(prev) = chunks.last()
        {
            let prev_spans = tokenizer.tokenize(&text[prev.range.clone()]);
            let mut carry = overlap.min(prev_spans.len());
            while carry > 0 {
                let candidate = prev.range.start + prev_spans[prev_spans.len() - carry].start;
                if tokenizer.count_tokens(&text[candidate..range.end]) <= budget {
                    start = candidate;
                    break;
                }
                carry -= 1;
            }
        }

        chunks.push(Chunk {
            text: text[start..range.end].to_string(),
            range: start..range.end,
            overlap: range.start - start,
        });
    }

    chunks
}

/// Builds the configured splitter around `tokenizer`.
pub fn build_splitter(
    kind: SplitterKind,
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    overlap: usize,
    separators: &[String],
) -> Box<dyn TextSplitter> {
    match kind {
        SplitterKind::Recursive => Box::new(
            RecursiveTokenSplitter::new(tokenizer, chunk_size, overlap)
                .with_separators(separators.to_vec()),
        ),
        SplitterKind::Token => Box::new(TokenSplitter::new(tokenizer, chunk_size, overlap)),
    }
}
