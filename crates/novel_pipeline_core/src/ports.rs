//! crates/novel_pipeline_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the pipeline's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete store behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Chapter, ChapterContext, ChapterListing, Chunk, ChunkWindow, NewChapter, NewChunk, Novel,
    ProgressEvent, ReadingHistory, Viewer, Volume,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error kinds surfaced at the pipeline boundary.
/// This abstracts away the specific errors from the store and the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Transient store failure or timeout; safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// What a writer does when another writer already holds a chapter's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Block until the holder commits or rolls back.
    #[default]
    Wait,
    /// Give up immediately with `PortError::Conflict`.
    Fail,
}

//=========================================================================================
// Read-side Ports
//=========================================================================================

#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Atomically deletes every chunk of the chapter and inserts `chunks`.
    async fn replace_all(&self, chapter_id: i64, chunks: &[NewChunk]) -> PortResult<()>;

    /// Chunks with position in `[start_position, start_position + limit)`, ascending.
    async fn range(&self, chapter_id: i64, start_position: i32, limit: i32)
        -> PortResult<Vec<Chunk>>;

    /// Whether any chunk exists with position `>= position`.
    async fn exists_after(&self, chapter_id: i64, position: i32) -> PortResult<bool>;

    async fn count(&self, chapter_id: i64) -> PortResult<i32>;

    async fn delete_all(&self, chapter_id: i64) -> PortResult<u64>;

    /// `range`, `exists_after(start + limit)` and `count` taken from one snapshot,
    /// so a concurrent replacement is never observed half-applied.
    async fn window(&self, chapter_id: i64, start_position: i32, limit: i32)
        -> PortResult<ChunkWindow>;
}

#[async_trait]
pub trait ChapterRepository: Send + Sync {
    async fn find_novel_by_slug(&self, novel_slug: &str) -> PortResult<Option<Novel>>;

    /// Looks up a non-deleted chapter by its public address.
    async fn find_chapter(
        &self,
        novel_slug: &str,
        chapter_slug: &str,
    ) -> PortResult<Option<ChapterContext>>;

    /// Looks up a non-deleted chapter by id.
    async fn find_chapter_by_id(&self, chapter_id: i64) -> PortResult<Option<ChapterContext>>;

    /// Every non-deleted chapter of the novel ordered by
    /// `(volume.position, chapter.position)`.
    async fn list_chapters(&self, novel_id: i64) -> PortResult<Vec<ChapterListing>>;
}

#[async_trait]
pub trait ReadingHistoryRepository: Send + Sync {
    async fn get_history(&self, user_id: Uuid, chapter_id: i64)
        -> PortResult<Option<ReadingHistory>>;

    /// Monotonic upsert of the `(user, chapter)` row; see
    /// [`crate::progress::decide`]. Returns the row as stored afterwards.
    async fn record_progress(
        &self,
        user_id: Uuid,
        novel_id: i64,
        event: ProgressEvent,
        now: DateTime<Utc>,
    ) -> PortResult<ReadingHistory>;
}

#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Maps an opaque session token to the caller, or `None` when unknown or expired.
    async fn resolve_session(&self, token: &str) -> PortResult<Option<Viewer>>;
}

//=========================================================================================
// Write-side Ports
//=========================================================================================

/// A unit of work against the store. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Serialises structural changes (new volumes and chapters) within a novel.
    async fn lock_novel(&mut self, novel_id: i64) -> PortResult<()>;

    /// Advisory lock held until the transaction ends.
    async fn lock_chapter(&mut self, chapter_id: i64, policy: LockPolicy) -> PortResult<()>;

    /// The chapter row as seen by this transaction, deleted or not.
    async fn chapter(&mut self, chapter_id: i64) -> PortResult<Option<Chapter>>;

    async fn volume(&mut self, volume_id: i64) -> PortResult<Option<Volume>>;

    async fn volume_by_name(&mut self, novel_id: i64, name: &str) -> PortResult<Option<Volume>>;

    async fn next_volume_position(&mut self, novel_id: i64) -> PortResult<i32>;

    async fn insert_volume(&mut self, novel_id: i64, name: &str, position: i32)
        -> PortResult<Volume>;

    /// Whether a non-deleted chapter in the volume already has this title.
    async fn title_taken(&mut self, volume_id: i64, title: &str) -> PortResult<bool>;

    /// Whether a non-deleted chapter anywhere in the novel already has this slug.
    async fn slug_taken(&mut self, novel_id: i64, slug: &str) -> PortResult<bool>;

    async fn next_chapter_position(&mut self, volume_id: i64) -> PortResult<i32>;

    async fn insert_chapter(&mut self, chapter: NewChapter) -> PortResult<Chapter>;

    async fn replace_chunks(&mut self, chapter_id: i64, chunks: &[NewChunk]) -> PortResult<()>;

    async fn set_word_count(
        &mut self,
        chapter_id: i64,
        word_count: i32,
        now: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn soft_delete_chapter(&mut self, chapter_id: i64, at: DateTime<Utc>) -> PortResult<()>;

    async fn delete_chunks(&mut self, chapter_id: i64) -> PortResult<u64>;

    async fn commit(self: Box<Self>) -> PortResult<()>;
}

#[async_trait]
pub trait Transactional: Send + Sync {
    async fn begin(&self) -> PortResult<Box<dyn StoreTransaction>>;
}

/// Everything the pipeline needs from its store.
pub trait PipelineStore:
    ChunkRepository + ChapterRepository + ReadingHistoryRepository + SessionResolver + Transactional
{
}

impl<T> PipelineStore for T where
    T: ChunkRepository
        + ChapterRepository
        + ReadingHistoryRepository
        + SessionResolver
        + Transactional
        + ?Sized
{
}
