//! crates/novel_pipeline_core/src/reader.rs
//!
//! The Reader Stream Service: serves chunk windows of a chapter to readers,
//! plus the novel's table of contents. Reads never touch reading history.

use std::sync::Arc;

use crate::domain::{ChapterListing, ChapterPage, ChunkPage, Novel, Viewer};
use crate::ports::{PipelineStore, PortError, PortResult};
use crate::visibility::{can_view_novel, ensure_visible, listing_is_visible, navigation};

/// Window sizes and reading-speed assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    pub initial_window: i32,
    pub max_window: i32,
    pub words_per_minute: i32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            initial_window: 10,
            max_window: 10,
            words_per_minute: 250,
        }
    }
}

pub struct ReaderService {
    store: Arc<dyn PipelineStore>,
    settings: ReaderSettings,
}

impl ReaderService {
    pub fn new(store: Arc<dyn PipelineStore>, settings: ReaderSettings) -> Self {
        Self { store, settings }
    }

    /// Opens a chapter: the first window of chunks, neighbouring chapters and
    /// the caller's saved progress.
    pub async fn first_window(
        &self,
        novel_slug: &str,
        chapter_slug: &str,
        viewer: Option<&Viewer>,
    ) -> PortResult<ChapterPage> {
        let ctx = self
            .store
            .find_chapter(novel_slug, chapter_slug)
            .await?
            .ok_or_else(|| {
                PortError::NotFound(format!("Chapter {novel_slug}/{chapter_slug} not found"))
            })?;
        ensure_visible(&ctx, viewer)?;

        let window = self
            .store
            .window(ctx.chapter.id, 1, self.settings.initial_window)
            .await?;
        let listings = self.store.list_chapters(ctx.novel.id).await?;
        let navigation = navigation(&listings, ctx.chapter.id, &ctx.novel, viewer);
        let progress = match viewer {
            Some(v) => self.store.get_history(v.user_id, ctx.chapter.id).await?,
            None => None,
        };

        let average_chunk_words = if window.total_chunks > 0 {
            f64::from(ctx.chapter.word_count) / f64::from(window.total_chunks)
        } else {
            0.0
        };
        let estimated_reading_minutes =
            f64::from(ctx.chapter.word_count) / f64::from(self.settings.words_per_minute.max(1));

        Ok(ChapterPage {
            chapter: ctx.chapter,
            volume: ctx.volume,
            novel: ctx.novel,
            chunks: window.chunks,
            total_chunks: window.total_chunks,
            has_more: window.has_more,
            navigation,
            progress,
            average_chunk_words,
            estimated_reading_minutes,
        })
    }

    /// A follow-up window. `start` defaults to 1 and `limit` to the maximum
    /// window; a larger `limit` is clamped rather than rejected.
    pub async fn next_window(
        &self,
        chapter_id: i64,
        start: Option<i32>,
        limit: Option<i32>,
        viewer: Option<&Viewer>,
    ) -> PortResult<ChunkPage> {
        let start = start.unwrap_or(1);
        if start < 1 {
            return Err(PortError::InvalidInput("start must be at least 1".to_string()));
        }
        let limit = limit.unwrap_or(self.settings.max_window);
        if limit < 1 {
            return Err(PortError::InvalidInput("limit must be at least 1".to_string()));
        }
        let limit = limit.min(self.settings.max_window);
        let next_start = start
            .checked_add(limit)
            .ok_or_else(|| PortError::InvalidInput("start is out of range".to_string()))?;

        let ctx = self
            .store
            .find_chapter_by_id(chapter_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Chapter {chapter_id} not found")))?;
        ensure_visible(&ctx, viewer)?;

        let window = self.store.window(chapter_id, start, limit).await?;
        Ok(ChunkPage {
            chunks: window.chunks,
            has_more: window.has_more,
            next_start,
        })
    }

    /// Chapters of a novel the caller may open, in reading order.
    pub async fn table_of_contents(
        &self,
        novel_slug: &str,
        viewer: Option<&Viewer>,
    ) -> PortResult<(Novel, Vec<ChapterListing>)> {
        let novel = self
            .store
            .find_novel_by_slug(novel_slug)
            .await?
            .filter(|novel| novel.deleted_at.is_none() && can_view_novel(novel, viewer))
            .ok_or_else(|| PortError::NotFound(format!("Novel {novel_slug} not found")))?;

        let chapters = self
            .store
            .list_chapters(novel.id)
            .await?
            .into_iter()
            .filter(|listing| listing_is_visible(listing, &novel, viewer))
            .collect();
        Ok((novel, chapters))
    }
}
