//! crates/novel_pipeline_core/src/manager.rs
//!
//! The Chunk Manager: runs one chunk-and-persist cycle for a chapter and keeps
//! the chapter's aggregate word count equal to the sum of its chunks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};

use crate::chunker::Chunker;
use crate::domain::NewChunk;
use crate::ports::{LockPolicy, PipelineStore, PortError, PortResult, StoreTransaction};

/// Result of a successful rechunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RechunkOutcome {
    pub chunk_count: usize,
    pub word_count: i32,
}

#[derive(Clone)]
pub struct ChunkManager {
    store: Arc<dyn PipelineStore>,
    permits: Arc<Semaphore>,
}

impl ChunkManager {
    /// `max_concurrent` bounds how many rechunk transactions may be open at once.
    pub fn new(store: Arc<dyn PipelineStore>, max_concurrent: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Splits `body` with `chunker` and replaces the chapter's chunks with the
    /// result in a single transaction. On any failure the previous chunks and
    /// word count are left untouched.
    pub async fn rechunk(
        &self,
        chapter_id: i64,
        body: &str,
        chunker: &dyn Chunker,
        policy: LockPolicy,
        now: DateTime<Utc>,
    ) -> PortResult<RechunkOutcome> {
        let _permit = self.permit().await?;
        let mut tx = self.store.begin().await?;
        let outcome = rechunk_in(tx.as_mut(), chapter_id, body, chunker, policy, now).await?;
        tx.commit().await?;

        info!(
            chapter_id,
            chunks = outcome.chunk_count,
            words = outcome.word_count,
            "Chapter rechunked"
        );
        Ok(outcome)
    }

    /// Waits for a free rechunk slot. Callers that open their own transaction
    /// around [`rechunk_in`] hold the permit for as long as that transaction.
    pub async fn permit(&self) -> PortResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| PortError::Unavailable("rechunk slots closed".to_string()))
    }
}

/// The rechunk cycle inside a caller-owned transaction. The chapter lock taken
/// here is released when `tx` commits or rolls back.
pub async fn rechunk_in(
    tx: &mut dyn StoreTransaction,
    chapter_id: i64,
    body: &str,
    chunker: &dyn Chunker,
    policy: LockPolicy,
    now: DateTime<Utc>,
) -> PortResult<RechunkOutcome> {
    tx.lock_chapter(chapter_id, policy).await?;

    match tx.chapter(chapter_id).await? {
        Some(chapter) if !chapter.is_deleted() => {}
        _ => return Err(PortError::NotFound(format!("Chapter {chapter_id} not found"))),
    }

    let pieces = chunker.split(body)?;
    let mut chunks = Vec::with_capacity(pieces.len());
    let mut word_count: i32 = 0;
    for (index, piece) in pieces.into_iter().enumerate() {
        let position = i32::try_from(index + 1)
            .map_err(|_| PortError::InvalidInput("body produces too many chunks".to_string()))?;
        word_count = word_count.saturating_add(piece.word_count);
        chunks.push(NewChunk {
            position,
            content: piece.content,
            word_count: piece.word_count,
        });
    }

    debug!(chapter_id, chunks = chunks.len(), "Replacing chunks");
    tx.replace_chunks(chapter_id, &chunks).await?;
    tx.set_word_count(chapter_id, word_count, now).await?;

    Ok(RechunkOutcome {
        chunk_count: chunks.len(),
        word_count,
    })
}
