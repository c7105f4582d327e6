//! Recursive character splitter.
//!
//! Splitting strategy:
//! 1. Split at the coarsest separator present (blank line, newline, space)
//! 2. Merge small pieces up to the chunk size, carrying an overlap
//! 3. Pieces still too large are split again with the next separator
//! 4. Last resort: single characters, merged into fixed windows
//!
//! Separators stay attached to the piece that follows them. Lengths are in
//! characters, not bytes.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(config: &ChunkingConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: config.chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Trimmed, non-empty chunks of at most `chunk_size` characters.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_text(text, &SEPARATORS)
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn split_text(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (sep, rest) = match separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
        {
            Some(i) if !separators[i].is_empty() => (separators[i], &separators[i + 1..]),
            _ => ("", &separators[..0]),
        };

        let mut out = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, sep) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                out.extend(self.merge(&small));
                small.clear();
            }
            if rest.is_empty() {
                out.push(piece.to_string());
            } else {
                out.extend(self.split_text(piece, rest));
            }
        }
        if !small.is_empty() {
            out.extend(self.merge(&small));
        }
        out
    }

    /// Greedily pack pieces into chunks; each new chunk starts with up to
    /// `chunk_overlap` characters from the end of the previous one.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&window, &mut chunks);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }
        push_joined(&window, &mut chunks);
        chunks
    }
}

fn push_joined(window: &VecDeque<&str>, chunks: &mut Vec<String>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split `text` before each occurrence of `sep`; an empty separator yields
/// single characters. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    if sep.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
