//! crates/novel_pipeline_core/src/domain.rs
//!
//! Defines the pure, core data structures for the chapter content pipeline.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Moderation state of a novel. Only `Approved` novels are publicly readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    /// The one-letter code used by the store.
    pub fn code(self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "d",
            ApprovalStatus::Pending => "p",
            ApprovalStatus::Approved => "a",
            ApprovalStatus::Rejected => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "d" => Some(ApprovalStatus::Draft),
            "p" => Some(ApprovalStatus::Pending),
            "a" => Some(ApprovalStatus::Approved),
            "r" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

/// The novel a chapter belongs to. Novels are managed elsewhere; the pipeline
/// only reads them for visibility and ownership decisions.
#[derive(Debug, Clone)]
pub struct Novel {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub approval_status: ApprovalStatus,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A named grouping of chapters within a novel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: i64,
    pub novel_id: i64,
    pub name: String,
    /// 1-based position within the novel.
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub id: i64,
    pub volume_id: i64,
    pub title: String,
    pub slug: String,
    /// 1-based position within the volume.
    pub position: i32,
    /// Sum of the word counts of the chapter's chunks.
    pub word_count: i32,
    pub approved: bool,
    pub is_hidden: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chapter {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A chapter together with the volume and novel that own it.
#[derive(Debug, Clone)]
pub struct ChapterContext {
    pub chapter: Chapter,
    pub volume: Volume,
    pub novel: Novel,
}

/// A persisted slice of a chapter body, addressed by its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chapter_id: i64,
    pub position: i32,
    pub content: String,
    pub word_count: i32,
}

/// A chunk about to be written; positions are assigned by the Chunk Manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChunk {
    pub position: i32,
    pub content: String,
    pub word_count: i32,
}

/// A contiguous range of chunks read from a single store snapshot.
#[derive(Debug, Clone)]
pub struct ChunkWindow {
    pub chunks: Vec<Chunk>,
    /// True iff a chunk exists at or after `start + limit`.
    pub has_more: bool,
    pub total_chunks: i32,
}

/// Per-user, per-chapter reading state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingHistory {
    pub user_id: Uuid,
    pub chapter_id: i64,
    pub novel_id: i64,
    pub current_chunk_position: i32,
    /// Percentage in `[0, 100]`.
    pub reading_progress: f64,
    pub updated_at: DateTime<Utc>,
}

/// A progress event posted by a reader's client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub chapter_id: i64,
    pub chunk_position: i32,
    pub reading_progress: f64,
}

/// The authenticated caller, as resolved from the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Uuid,
    pub is_moderator: bool,
}

/// One row of a novel's table of contents, in reading order.
#[derive(Debug, Clone)]
pub struct ChapterListing {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub position: i32,
    pub word_count: i32,
    pub approved: bool,
    pub is_hidden: bool,
    pub volume_id: i64,
    pub volume_name: String,
    pub volume_position: i32,
}

/// A pointer to a neighbouring chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub id: i64,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Navigation {
    pub previous: Option<ChapterLink>,
    pub next: Option<ChapterLink>,
}

/// Everything a reader needs to render the top of a chapter.
#[derive(Debug, Clone)]
pub struct ChapterPage {
    pub chapter: Chapter,
    pub volume: Volume,
    pub novel: Novel,
    pub chunks: Vec<Chunk>,
    pub total_chunks: i32,
    pub has_more: bool,
    pub navigation: Navigation,
    pub progress: Option<ReadingHistory>,
    pub average_chunk_words: f64,
    pub estimated_reading_minutes: f64,
}

/// A follow-up window requested while the reader scrolls.
#[derive(Debug, Clone)]
pub struct ChunkPage {
    pub chunks: Vec<Chunk>,
    pub has_more: bool,
    pub next_start: i32,
}

/// Either an existing volume or a new one created together with the chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeChoice {
    Existing { volume_id: i64 },
    New { name: String },
}

/// A validated request to add a chapter to a novel.
#[derive(Debug, Clone)]
pub struct ChapterDraft {
    pub title: String,
    pub volume: VolumeChoice,
    pub content: String,
    pub format: ContentFormat,
}

/// The markup a chapter body is written in; selects the chunker variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentFormat {
    #[default]
    Html,
    Plain,
}

/// The row a store inserts when a chapter is created.
#[derive(Debug, Clone)]
pub struct NewChapter {
    pub volume_id: i64,
    pub title: String,
    pub slug: String,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}
