//! Line-window markdown chunker.
//!
//! Splits a markdown file into overlapping [`Chunk`]s that respect an
//! approximate token budget. Chunks always end on line boundaries (except
//! for single lines longer than the budget) and carry their 1-based,
//! inclusive line range in the original file.
//!
//! # Algorithm
//!
//! 1. Convert `tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split the text on `\n`. Lines longer than `max_chars` are cut into
//!    `max_chars`-sized character slices that keep the line number.
//! 3. Accumulate line segments (each costing `len + 1` for its newline)
//!    until the next one would exceed `max_chars`, then flush the window.
//! 4. Seed the next window with the trailing lines of the previous one
//!    worth about `overlap` tokens, dropping the oldest of them if the
//!    incoming segment would not fit.
//! 5. Empty input yields exactly one empty chunk covering line `1..1`.
//!
//! # Example
//!
//! ```rust
//! use memory_harness_core::chunk::{chunk_markdown, ChunkingParams};
//!
//! let chunks = chunk_markdown("# Title\n\nSome notes.", &ChunkingParams::new(400, 80));
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
//! ```

use crate::hash::hash_text;
use crate::models::Chunk;

/// Approximate characters-per-token ratio.
///
/// Shared with embedding batch sizing in [`crate::embedding`].
pub const CHARS_PER_TOKEN: usize = 4;

/// Lower bound on the window size so tiny budgets still make progress.
const MIN_CHUNK_CHARS: usize = 32;

/// Chunk sizing in approximate tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub tokens: usize,
    pub overlap: usize,
}

impl ChunkingParams {
    pub fn new(tokens: usize, overlap: usize) -> Self {
        Self { tokens, overlap }
    }

    /// Window size in characters.
    pub fn max_chars(&self) -> usize {
        self.tokens.saturating_mul(CHARS_PER_TOKEN).max(MIN_CHUNK_CHARS)
    }

    /// Overlap in characters, always strictly below [`Self::max_chars`].
    pub fn overlap_chars(&self) -> usize {
        let overlap = self.overlap.min(self.tokens.saturating_sub(1));
        overlap.saturating_mul(CHARS_PER_TOKEN).min(self.max_chars() - 1)
    }
}

/// A piece of one source line. Long lines produce several segments.
#[derive(Debug, Clone, Copy)]
struct Segment<'a> {
    text: &'a str,
    line: usize,
    chars: usize,
}

impl Segment<'_> {
    fn cost(&self) -> usize {
        self.chars + 1
    }
}

/// Split markdown into overlapping line-bounded chunks.
///
/// # Guarantees
///
/// - At least one chunk is always returned (even for empty text).
/// - Every input line is covered by at least one chunk.
/// - No chunk's text exceeds `params.max_chars()` characters.
/// - Deterministic: the same input and params produce the same chunks.
pub fn chunk_markdown(text: &str, params: &ChunkingParams) -> Vec<Chunk> {
    let max_chars = params.max_chars();
    let overlap_chars = params.overlap_chars();

    let mut chunks = Vec::new();
    let mut window: Vec<Segment<'_>> = Vec::new();
    let mut window_chars = 0usize;

    for (idx, line) in text.split('\n').enumerate() {
        for segment in split_line(line, idx + 1, max_chars) {
            let cost = segment.cost();
            if window_chars + cost > max_chars && !window.is_empty() {
                chunks.push(make_chunk(&window));
                window_chars = carry_overlap(&mut window, overlap_chars, cost, max_chars);
            }
            window_chars += cost;
            window.push(segment);
        }
    }

    if !window.is_empty() {
        chunks.push(make_chunk(&window));
    }

    chunks
}

/// Cut a line into segments of at most `max_chars` characters.
fn split_line(line: &str, line_no: usize, max_chars: usize) -> Vec<Segment<'_>> {
    if line.is_empty() {
        return vec![Segment {
            text: line,
            line: line_no,
            chars: 0,
        }];
    }

    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut chars = 0usize;
    for (byte_idx, _) in line.char_indices() {
        if chars == max_chars {
            segments.push(Segment {
                text: &line[start..byte_idx],
                line: line_no,
                chars,
            });
            start = byte_idx;
            chars = 0;
        }
        chars += 1;
    }
    segments.push(Segment {
        text: &line[start..],
        line: line_no,
        chars,
    });
    segments
}

/// Keep the trailing segments worth about `overlap_chars` and return the
/// new window size. Oldest carried segments are dropped until `incoming`
/// fits, so every flushed chunk stays within `max_chars`.
fn carry_overlap(
    window: &mut Vec<Segment<'_>>,
    overlap_chars: usize,
    incoming: usize,
    max_chars: usize,
) -> usize {
    if overlap_chars == 0 {
        window.clear();
        return 0;
    }

    let mut kept = 0usize;
    let mut keep_from = window.len();
    for (i, seg) in window.iter().enumerate().rev() {
        kept += seg.cost();
        keep_from = i;
        if kept >= overlap_chars {
            break;
        }
    }
    window.drain(..keep_from);

    while !window.is_empty() && kept + incoming > max_chars {
        let dropped = window.remove(0);
        kept -= dropped.cost();
    }
    kept
}

fn make_chunk(window: &[Segment<'_>]) -> Chunk {
    let text = window
        .iter()
        .map(|s| s.text)
        .collect::<Vec<_>>()
        .join("\n");
    let start_line = window.first().map(|s| s.line).unwrap_or(1);
    let end_line = window.last().map(|s| s.line).unwrap_or(start_line);
    let hash = hash_text(&text);
    Chunk {
        start_line,
        end_line,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (1..=n)
            .map(|i| format!("line {:03} with a few words of filler", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_huge_token_budget_saturates() {
        let params = ChunkingParams::new(usize::MAX, usize::MAX - 1);
        assert_eq!(params.max_chars(), usize::MAX);
        assert!(params.overlap_chars() < params.max_chars());
        let chunks = chunk_markdown("a\nb", &params);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a\nb");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_markdown("", &ChunkingParams::new(400, 80));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
        assert_eq!(chunks[0].hash, hash_text(""));
    }

    #[test]
    fn test_small_text_single_chunk() {
        let text = "# Notes\n\nRemember the milk.";
        let chunks = chunk_markdown(text, &ChunkingParams::new(400, 80));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
    }

    #[test]
    fn test_no_overlap_reconstructs_input() {
        let text = numbered_lines(60);
        let chunks = chunk_markdown(&text, &ChunkingParams::new(40, 0));
        assert!(chunks.len() > 1);
        let rebuilt = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(rebuilt, text);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn test_overlap_repeats_trailing_lines() {
        let text = numbered_lines(60);
        let chunks = chunk_markdown(&text, &ChunkingParams::new(40, 12));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line);
            assert!(pair[1].end_line > pair[0].end_line);
        }
    }

    #[test]
    fn test_every_line_covered() {
        let text = numbered_lines(75);
        let chunks = chunk_markdown(&text, &ChunkingParams::new(25, 5));
        let mut covered = vec![false; 75];
        for c in &chunks {
            for line in c.start_line..=c.end_line {
                covered[line - 1] = true;
            }
        }
        assert!(covered.iter().all(|c| *c));
        assert_eq!(chunks.last().unwrap().end_line, 75);
    }

    #[test]
    fn test_chunks_respect_budget() {
        let params = ChunkingParams::new(20, 8);
        let text = format!("{}\n{}", numbered_lines(40), "x".repeat(500));
        for c in chunk_markdown(&text, &params) {
            assert!(
                c.text.chars().count() <= params.max_chars(),
                "chunk {}..{} has {} chars",
                c.start_line,
                c.end_line,
                c.text.chars().count()
            );
        }
    }

    #[test]
    fn test_long_line_split_not_truncated() {
        let line = "abcdefghij".repeat(100);
        let params = ChunkingParams::new(10, 0);
        let chunks = chunk_markdown(&line, &params);
        assert_eq!(chunks.len(), 1000 / params.max_chars());
        for c in &chunks {
            assert_eq!((c.start_line, c.end_line), (1, 1));
        }
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, line);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let frame = "┌──────────────────┐\n│ Hello wörld ✓    │\n└──────────────────┘";
        let text = frame.repeat(5);
        let chunks = chunk_markdown(&text, &ChunkingParams::new(3, 1));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 32);
        }
    }

    #[test]
    fn test_overlap_not_smaller_than_budget_terminates() {
        let text = numbered_lines(30);
        let chunks = chunk_markdown(&text, &ChunkingParams::new(10, 50));
        assert!(chunks.len() > 1);
        assert_eq!(chunks.last().unwrap().end_line, 30);
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_lines(40);
        let params = ChunkingParams::new(30, 6);
        let c1 = chunk_markdown(&text, &params);
        let c2 = chunk_markdown(&text, &params);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_hash_matches_text() {
        for c in chunk_markdown(&numbered_lines(20), &ChunkingParams::new(20, 4)) {
            assert_eq!(c.hash, hash_text(&c.text));
        }
    }
}
