//! crates/novel_pipeline_core/src/chapters.rs
//!
//! Author-side chapter lifecycle: creation (optionally with a new volume),
//! content replacement and soft deletion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::chunker::chunker_for;
use crate::domain::{
    ApprovalStatus, Chapter, ChapterDraft, ContentFormat, NewChapter, Novel, Viewer, Volume,
    VolumeChoice,
};
use crate::manager::{rechunk_in, ChunkManager, RechunkOutcome};
use crate::ports::{LockPolicy, PipelineStore, PortError, PortResult, StoreTransaction};
use crate::slug::chapter_slug;
use crate::visibility::{can_view, is_owner, is_privileged};

pub const MAX_TITLE_LENGTH: usize = 255;
pub const MAX_VOLUME_NAME_LENGTH: usize = 255;

/// A validation failure tied to one input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Shape checks on a draft that need no store access.
pub fn validate_draft(draft: &ChapterDraft) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let title = draft.title.trim();
    if title.is_empty() {
        errors.push(FieldError::new("title", "Title is required."));
    } else if title.chars().count() > MAX_TITLE_LENGTH {
        errors.push(FieldError::new(
            "title",
            format!("Title must be at most {MAX_TITLE_LENGTH} characters."),
        ));
    }

    if let VolumeChoice::New { name } = &draft.volume {
        let name = name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("new_volume_name", "Volume name is required."));
        } else if name.chars().count() > MAX_VOLUME_NAME_LENGTH {
            errors.push(FieldError::new(
                "new_volume_name",
                format!("Volume name must be at most {MAX_VOLUME_NAME_LENGTH} characters."),
            ));
        }
    }

    if draft.content.trim().is_empty() {
        errors.push(FieldError::new("content", "Content is required."));
    }
    errors
}

/// The rows written by a successful [`ChapterService::add_chapter`].
#[derive(Debug, Clone)]
pub struct CreatedChapter {
    pub novel: Novel,
    pub volume: Volume,
    pub chapter: Chapter,
    pub chunk_count: usize,
}

pub struct ChapterService {
    store: Arc<dyn PipelineStore>,
    manager: ChunkManager,
    max_chunk_size: usize,
    /// Applied when a content replacement finds the chapter lock held.
    replace_policy: LockPolicy,
}

impl ChapterService {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        manager: ChunkManager,
        max_chunk_size: usize,
        replace_policy: LockPolicy,
    ) -> Self {
        Self {
            store,
            manager,
            max_chunk_size,
            replace_policy,
        }
    }

    /// Creates a chapter, and its volume when `draft.volume` asks for a new
    /// one, then chunks the body. Everything commits together or not at all.
    pub async fn add_chapter(
        &self,
        viewer: Option<&Viewer>,
        novel_slug: &str,
        draft: ChapterDraft,
        now: DateTime<Utc>,
    ) -> PortResult<CreatedChapter> {
        let viewer = viewer.ok_or(PortError::Unauthenticated)?;
        let novel = self.live_novel(novel_slug).await?;
        if !is_owner(&novel, Some(viewer)) {
            return Err(PortError::Forbidden(
                "only the author may add chapters".to_string(),
            ));
        }
        if novel.approval_status != ApprovalStatus::Approved {
            return Err(PortError::Forbidden(
                "chapters can only be added to approved novels".to_string(),
            ));
        }

        let errors = validate_draft(&draft);
        if let Some(first) = errors.first() {
            return Err(PortError::InvalidInput(format!("{}: {}", first.field, first.message)));
        }
        let title = draft.title.trim();

        let _permit = self.manager.permit().await?;
        let mut tx = self.store.begin().await?;
        tx.lock_novel(novel.id).await?;

        let volume = resolve_volume(tx.as_mut(), &novel, &draft.volume).await?;
        if tx.title_taken(volume.id, title).await? {
            return Err(PortError::Conflict(format!(
                "a chapter titled '{title}' already exists in this volume"
            )));
        }

        let position = tx.next_chapter_position(volume.id).await?;
        let slug = unique_slug(
            tx.as_mut(),
            novel.id,
            chapter_slug(&volume.name, volume.position, title, position),
        )
        .await?;

        let chapter = tx
            .insert_chapter(NewChapter {
                volume_id: volume.id,
                title: title.to_string(),
                slug,
                position,
                created_at: now,
            })
            .await?;

        let chunker = chunker_for(draft.format, self.max_chunk_size);
        let outcome = rechunk_in(
            tx.as_mut(),
            chapter.id,
            &draft.content,
            chunker.as_ref(),
            LockPolicy::Wait,
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            novel = %novel.slug,
            chapter_id = chapter.id,
            slug = %chapter.slug,
            chunks = outcome.chunk_count,
            "Chapter created"
        );

        Ok(CreatedChapter {
            chapter: Chapter {
                word_count: outcome.word_count,
                updated_at: now,
                ..chapter
            },
            novel,
            volume,
            chunk_count: outcome.chunk_count,
        })
    }

    /// Replaces the body of an existing chapter.
    pub async fn replace_content(
        &self,
        viewer: Option<&Viewer>,
        novel_slug: &str,
        chapter_slug: &str,
        content: &str,
        format: ContentFormat,
        now: DateTime<Utc>,
    ) -> PortResult<RechunkOutcome> {
        let chapter_id = self.managed_chapter(viewer, novel_slug, chapter_slug).await?;
        let chunker = chunker_for(format, self.max_chunk_size);
        self.manager
            .rechunk(chapter_id, content, chunker.as_ref(), self.replace_policy, now)
            .await
    }

    /// Soft-deletes a chapter and drops its chunks. Returns the owning novel.
    pub async fn delete_chapter(
        &self,
        viewer: Option<&Viewer>,
        novel_slug: &str,
        chapter_slug: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Novel> {
        let chapter_id = self.managed_chapter(viewer, novel_slug, chapter_slug).await?;

        let mut tx = self.store.begin().await?;
        tx.lock_chapter(chapter_id, LockPolicy::Wait).await?;
        match tx.chapter(chapter_id).await? {
            Some(chapter) if !chapter.is_deleted() => {}
            _ => return Err(PortError::NotFound(format!("Chapter {chapter_id} not found"))),
        }
        tx.soft_delete_chapter(chapter_id, now).await?;
        let removed = tx.delete_chunks(chapter_id).await?;
        tx.commit().await?;

        info!(chapter_id, chunks_removed = removed, "Chapter deleted");
        self.store
            .find_novel_by_slug(novel_slug)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Novel {novel_slug} not found")))
    }

    async fn live_novel(&self, novel_slug: &str) -> PortResult<Novel> {
        match self.store.find_novel_by_slug(novel_slug).await? {
            Some(novel) if novel.deleted_at.is_none() => Ok(novel),
            _ => Err(PortError::NotFound(format!("Novel {novel_slug} not found"))),
        }
    }

    /// Resolves a chapter the caller may mutate. Readers who cannot even see
    /// the chapter get `NotFound`; those who can but do not own it get `Forbidden`.
    async fn managed_chapter(
        &self,
        viewer: Option<&Viewer>,
        novel_slug: &str,
        chapter_slug: &str,
    ) -> PortResult<i64> {
        let viewer = viewer.ok_or(PortError::Unauthenticated)?;
        let ctx = self
            .store
            .find_chapter(novel_slug, chapter_slug)
            .await?
            .filter(|ctx| ctx.novel.deleted_at.is_none())
            .ok_or_else(|| {
                PortError::NotFound(format!("Chapter {novel_slug}/{chapter_slug} not found"))
            })?;

        if is_privileged(&ctx.novel, Some(viewer)) {
            return Ok(ctx.chapter.id);
        }
        if can_view(&ctx, Some(viewer)) {
            Err(PortError::Forbidden(
                "only the author or a moderator may change this chapter".to_string(),
            ))
        } else {
            Err(PortError::NotFound(format!(
                "Chapter {novel_slug}/{chapter_slug} not found"
            )))
        }
    }
}

async fn resolve_volume(
    tx: &mut dyn StoreTransaction,
    novel: &Novel,
    choice: &VolumeChoice,
) -> PortResult<Volume> {
    match choice {
        VolumeChoice::Existing { volume_id } => match tx.volume(*volume_id).await? {
            Some(volume) if volume.novel_id == novel.id => Ok(volume),
            _ => Err(PortError::InvalidInput(format!(
                "volume_choice: volume {volume_id} does not belong to this novel"
            ))),
        },
        VolumeChoice::New { name } => {
            let name = name.trim();
            if tx.volume_by_name(novel.id, name).await?.is_some() {
                return Err(PortError::Conflict(format!(
                    "a volume named '{name}' already exists"
                )));
            }
            let position = tx.next_volume_position(novel.id).await?;
            tx.insert_volume(novel.id, name, position).await
        }
    }
}

/// `base`, or `base-2`, `base-3`, ... for the first one not used in the novel.
async fn unique_slug(tx: &mut dyn StoreTransaction, novel_id: i64, base: String) -> PortResult<String> {
    if !tx.slug_taken(novel_id, &base).await? {
        return Ok(base);
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !tx.slug_taken(novel_id, &candidate).await? {
            return Ok(candidate);
        }
        suffix += 1;
    }
}
