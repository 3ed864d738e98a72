//! crates/novel_pipeline_core/src/chunker/mod.rs
//!
//! Splits a chapter body into bounded, ordered chunks that fit the store's
//! text column. Chunkers are pure: no I/O, no shared state, safe to run in
//! parallel across chapters.

mod html;
mod plain;

pub use html::{visible_text, HtmlChunker};
pub use plain::PlainChunker;

use crate::domain::ContentFormat;
use crate::ports::{PortError, PortResult};

/// Characters per chunk when nothing else is configured.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 65_000;

/// One slice of a body produced by a [`Chunker`], before it gets a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub content: String,
    pub word_count: i32,
}

impl ChunkPiece {
    /// Length in characters, the unit `max_chunk_size` is expressed in.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

pub trait Chunker: Send + Sync {
    /// Splits `body` into chunks of at most `max_chunk_size` characters, in
    /// source order, none of them empty or whitespace-only.
    fn split(&self, body: &str) -> PortResult<Vec<ChunkPiece>>;

    fn max_chunk_size(&self) -> usize;
}

/// Picks the chunker variant for a body format.
pub fn chunker_for(format: ContentFormat, max_chunk_size: usize) -> Box<dyn Chunker> {
    match format {
        ContentFormat::Html => Box::new(HtmlChunker::new(max_chunk_size)),
        ContentFormat::Plain => Box::new(PlainChunker::new(max_chunk_size)),
    }
}

/// A word is a maximal run of non-whitespace.
pub fn count_words(text: &str) -> i32 {
    i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX)
}

fn ensure_positive(max_chunk_size: usize) -> PortResult<()> {
    if max_chunk_size == 0 {
        return Err(PortError::InvalidInput(
            "max_chunk_size must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Cuts `text` into pieces of at most `max` characters without looking for
/// natural boundaries, except that a piece never ends inside a tag or a
/// character reference when an earlier cut point exists.
pub(crate) fn hard_cut(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max).min(chars.len());
        if end < chars.len() {
            if let Some(open) = unterminated_markup(&chars[start..end]) {
                if open > 0 {
                    end = start + open;
                }
            }
        }
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }
        start = end;
    }
    pieces
}

/// Offset of a `<` or `&` in `window` whose tag or reference is not closed
/// before the window ends.
fn unterminated_markup(window: &[char]) -> Option<usize> {
    let last_lt = window.iter().rposition(|&c| c == '<');
    let last_gt = window.iter().rposition(|&c| c == '>');
    if let Some(lt) = last_lt {
        if last_gt.map_or(true, |gt| gt < lt) {
            return Some(lt);
        }
    }
    let amp = window.iter().rposition(|&c| c == '&')?;
    let tail = &window[amp + 1..];
    let looks_like_reference = tail.len() < 10
        && tail.iter().all(|&c| c.is_ascii_alphanumeric() || c == '#');
    looks_like_reference.then_some(amp)
}
