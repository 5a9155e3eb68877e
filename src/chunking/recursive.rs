//! Recursive, separator-aware splitting under a token budget.

use std::ops::Range;
use std::sync::Arc;

use super::{
    Chunk, DEFAULT_SEPARATORS, TextSplitter, Tokenizer, assemble_chunks, clamp_overlap,
};

/// Splits on the coarsest separator that helps, recursing into pieces that
/// are still over budget and merging neighbours back together while they fit.
///
/// Separators stay attached to the end of the piece they close, so no input
/// is ever lost. When no separator splits an oversized piece, it is cut at a
/// token boundary.
pub struct RecursiveTokenSplitter {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl RecursiveTokenSplitter {
    /// Creates a splitter with the default paragraph/sentence/whitespace
    /// separators.
    ///
    /// `chunk_size` is at least 1 and `overlap` is clamped below it.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tokenizer,
            chunk_size,
            overlap: clamp_overlap(chunk_size, overlap),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replaces the separator list. Order is coarse to fine; empty
    /// separators are ignored.
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators.into_iter().filter(|s| !s.is_empty()).collect();
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn fits(&self, text: &str, range: &Range<usize>, budget: usize) -> bool {
        self.tokenizer.count_tokens(&text[range.clone()]) <= budget
    }

    fn split_range(
        &self,
        text: &str,
        range: Range<usize>,
        level: usize,
        budget: usize,
    ) -> Vec<Range<usize>> {
        if self.fits(text, &range, budget) {
            return vec![range];
        }

        for (offset, separator) in self.separators[level..].iter().enumerate() {
            let pieces = split_keeping_separator(text, range.clone(), separator);
            if pieces.len() < 2 {
                continue;
            }

            let finer = level + offset + 1;
            let mut out = Vec::new();
            for piece in pieces {
                out.extend(self.split_range(text, piece, finer, budget));
            }
            return self.merge(text, out, budget);
        }

        self.hard_cut(text, range, budget)
    }

    /// Greedily joins adjacent ranges while the union stays within budget.
    fn merge(&self, text: &str, ranges: Vec<Range<usize>>, budget: usize) -> Vec<Range<usize>> {
        let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = merged.last_mut() {
                let joined = last.start..range.end;
                if self.fits(text, &joined, budget) {
                    *last = joined;
                    continue;
                }
            }
            merged.push(range);
        }
        merged
    }

    /// Cuts `range` every `budget` tokens, at the start of the next token.
    fn hard_cut(&self, text: &str, range: Range<usize>, budget: usize) -> Vec<Range<usize>> {
        let spans = self.tokenizer.tokenize(&text[range.clone()]);
        if spans.len() <= budget {
            return vec![range];
        }

        let mut out = Vec::new();
        let mut start = range.start;
        let mut next = budget;
        while next < spans.len() {
            let cut = range.start + spans[next].start;
            out.push(start..cut);
            start = cut;
            next += budget;
        }
        out.push(start..range.end);
        out
    }
}

/// Splits `range` after every occurrence of `separator`.
///
/// The pieces tile `range` exactly; each separator ends the piece before it.
fn split_keeping_separator(text: &str, range: Range<usize>, separator: &str) -> Vec<Range<usize>> {
    let slice = &text[range.clone()];
    let mut pieces = Vec::new();
    let mut start = range.start;

    for (idx, matched) in slice.match_indices(separator) {
        let end = range.start + idx + matched.len();
        if end > start {
            pieces.push(start..end);
            start = end;
        }
    }
    if start < range.end {
        pieces.push(start..range.end);
    }
    pieces
}

impl TextSplitter for RecursiveTokenSplitter {
    fn chunks(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let whole = 0..text.len();
        if self.fits(text, &whole, self.chunk_size) {
            return vec![Chunk {
                text: text.to_string(),
                range: whole,
                overlap: 0,
            }];
        }

        // Reserve room for the carried overlap in every chunk
        let content_budget = self.chunk_size - self.overlap;
        let ranges = self.split_range(text, whole, 0, content_budget);
        assemble_chunks(
            text,
            &ranges,
            self.tokenizer.as_ref(),
            self.chunk_size,
            self.overlap,
        )
    }
}
