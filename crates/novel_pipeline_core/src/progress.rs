//! crates/novel_pipeline_core/src/progress.rs
//!
//! The Reading Progress Tracker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{ProgressEvent, ReadingHistory, Viewer};
use crate::ports::{PipelineStore, PortError, PortResult};
use crate::visibility::ensure_visible;

/// What a store does with an incoming progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No row yet for this user and chapter.
    Insert,
    Apply,
    /// A stale event: it would lower the progress without moving forward.
    Discard,
    /// Same values as stored; `updated_at` stays as it is.
    Unchanged,
}

pub fn decide(existing: Option<&ReadingHistory>, event: &ProgressEvent) -> Decision {
    let Some(stored) = existing else {
        return Decision::Insert;
    };
    if stored.current_chunk_position == event.chunk_position
        && stored.reading_progress == event.reading_progress
    {
        return Decision::Unchanged;
    }
    if stored.reading_progress > event.reading_progress
        && event.chunk_position <= stored.current_chunk_position
    {
        return Decision::Discard;
    }
    Decision::Apply
}

pub struct ProgressTracker {
    store: Arc<dyn PipelineStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// Records where a reader is in a chapter and returns the row as stored,
    /// which may be the previous state when the event was stale.
    pub async fn record(
        &self,
        viewer: Option<&Viewer>,
        event: ProgressEvent,
        now: DateTime<Utc>,
    ) -> PortResult<ReadingHistory> {
        let viewer = viewer.ok_or(PortError::Unauthenticated)?;
        let ctx = self
            .store
            .find_chapter_by_id(event.chapter_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Chapter {} not found", event.chapter_id)))?;
        ensure_visible(&ctx, Some(viewer))?;

        if event.chunk_position < 0 {
            return Err(PortError::InvalidInput(
                "chunk_position must not be negative".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&event.reading_progress) {
            return Err(PortError::InvalidInput(
                "reading_progress must be between 0 and 100".to_string(),
            ));
        }
        let total = self.store.count(event.chapter_id).await?;
        if event.chunk_position > total {
            return Err(PortError::InvalidInput(format!(
                "chunk_position {} is past the last chunk ({total})",
                event.chunk_position
            )));
        }

        let stored = self
            .store
            .record_progress(viewer.user_id, ctx.novel.id, event, now)
            .await?;
        debug!(
            user_id = %viewer.user_id,
            chapter_id = event.chapter_id,
            position = stored.current_chunk_position,
            "Reading progress recorded"
        );
        Ok(stored)
    }

    pub async fn get(
        &self,
        viewer: Option<&Viewer>,
        chapter_id: i64,
    ) -> PortResult<Option<ReadingHistory>> {
        let viewer = viewer.ok_or(PortError::Unauthenticated)?;
        let ctx = self
            .store
            .find_chapter_by_id(chapter_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Chapter {chapter_id} not found")))?;
        ensure_visible(&ctx, Some(viewer))?;
        self.store.get_history(viewer.user_id, chapter_id).await
    }
}
