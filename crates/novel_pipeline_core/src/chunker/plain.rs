use std::sync::LazyLock;

use regex::Regex;

use super::{count_words, ensure_positive, ChunkPiece, Chunker, DEFAULT_MAX_CHUNK_SIZE};
use crate::ports::PortResult;

static EXTRA_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n+").expect("blank line pattern"));
static SPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("space run pattern"));

/// Break markers in descending order of preference. The last resort, any
/// whitespace, is handled separately.
const PREFERRED_BREAKS: [&str; 3] = ["\n\n", "\n", ". "];

/// Chunker for plain-text bodies.
#[derive(Debug, Clone)]
pub struct PlainChunker {
    max_chunk_size: usize,
}

impl PlainChunker {
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    /// Collapses blank-line runs to one blank line and space/tab runs to a
    /// single space, then trims the body.
    pub fn normalize(body: &str) -> String {
        let body = EXTRA_BLANK_LINES.replace_all(body, "\n\n");
        let body = SPACE_RUNS.replace_all(&body, " ");
        body.trim().to_string()
    }

    fn split_normalized(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.max_chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            while start < chars.len() && chars[start].is_whitespace() {
                start += 1;
            }
            if start >= chars.len() {
                break;
            }

            let end = if chars.len() - start <= self.max_chunk_size {
                chars.len()
            } else {
                let limit = start + self.max_chunk_size;
                find_break(&chars, start, limit).unwrap_or(limit)
            };

            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            start = end;
        }
        chunks
    }
}

impl Default for PlainChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_SIZE)
    }
}

impl Chunker for PlainChunker {
    fn split(&self, body: &str) -> PortResult<Vec<ChunkPiece>> {
        ensure_positive(self.max_chunk_size)?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let normalized = Self::normalize(body);
        Ok(self
            .split_normalized(&normalized)
            .into_iter()
            .map(|content| ChunkPiece {
                word_count: count_words(&content),
                content,
            })
            .collect())
    }

    fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

/// Where to end a chunk that starts at `start` and may hold at most
/// `limit - start` characters. Break markers all end in whitespace, so one
/// whose trailing whitespace sits at `limit` still fits once trimmed; the
/// same goes for a bare space at `limit`.
fn find_break(chars: &[char], start: usize, limit: usize) -> Option<usize> {
    let bound = (limit + 1).min(chars.len());
    for marker in PREFERRED_BREAKS {
        let marker: Vec<char> = marker.chars().collect();
        if let Some(at) = rfind(chars, &marker, start, bound) {
            if at > start {
                return Some(at + marker.len());
            }
        }
    }
    (start + 1..bound).rev().find(|&i| chars[i].is_whitespace())
}

/// Last occurrence of `needle` lying entirely inside `haystack[start..end]`.
fn rfind(haystack: &[char], needle: &[char], start: usize, end: usize) -> Option<usize> {
    if end < start + needle.len() {
        return None;
    }
    (start..=end - needle.len())
        .rev()
        .find(|&i| haystack[i..i + needle.len()] == *needle)
}
