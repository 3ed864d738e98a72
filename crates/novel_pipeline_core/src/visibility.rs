//! crates/novel_pipeline_core/src/visibility.rs
//!
//! Who may see which chapter, and how readers move between chapters.

use crate::domain::{
    ApprovalStatus, Chapter, ChapterContext, ChapterLink, ChapterListing, Navigation, Novel,
    Viewer,
};
use crate::ports::{PortError, PortResult};

pub fn is_owner(novel: &Novel, viewer: Option<&Viewer>) -> bool {
    matches!((novel.owner_id, viewer), (Some(owner), Some(v)) if owner == v.user_id)
}

/// Owners and moderators see every non-deleted chapter of a novel.
pub fn is_privileged(novel: &Novel, viewer: Option<&Viewer>) -> bool {
    viewer.is_some_and(|v| v.is_moderator) || is_owner(novel, viewer)
}

pub fn novel_is_public(novel: &Novel) -> bool {
    novel.approval_status == ApprovalStatus::Approved && novel.deleted_at.is_none()
}

fn is_public(novel: &Novel, approved: bool, is_hidden: bool) -> bool {
    approved && !is_hidden && novel_is_public(novel)
}

pub fn chapter_is_public(chapter: &Chapter, novel: &Novel) -> bool {
    !chapter.is_deleted() && is_public(novel, chapter.approved, chapter.is_hidden)
}

pub fn can_view(ctx: &ChapterContext, viewer: Option<&Viewer>) -> bool {
    if ctx.chapter.is_deleted() {
        return false;
    }
    chapter_is_public(&ctx.chapter, &ctx.novel) || is_privileged(&ctx.novel, viewer)
}

pub fn can_view_novel(novel: &Novel, viewer: Option<&Viewer>) -> bool {
    novel_is_public(novel) || is_privileged(novel, viewer)
}

pub fn listing_is_visible(listing: &ChapterListing, novel: &Novel, viewer: Option<&Viewer>) -> bool {
    is_public(novel, listing.approved, listing.is_hidden) || is_privileged(novel, viewer)
}

/// Fails with `NotFound`, never `Forbidden`, so existence is not confirmed.
pub fn ensure_visible(ctx: &ChapterContext, viewer: Option<&Viewer>) -> PortResult<()> {
    if can_view(ctx, viewer) {
        Ok(())
    } else {
        Err(PortError::NotFound(format!("Chapter {} not found", ctx.chapter.id)))
    }
}

/// Previous and next chapters visible to `viewer`, given every chapter of the
/// novel in reading order.
pub fn navigation(
    listings: &[ChapterListing],
    current_id: i64,
    novel: &Novel,
    viewer: Option<&Viewer>,
) -> Navigation {
    let Some(current) = listings.iter().position(|l| l.id == current_id) else {
        return Navigation::default();
    };
    let visible = |l: &&ChapterListing| listing_is_visible(l, novel, viewer);

    Navigation {
        previous: listings[..current].iter().rev().find(visible).map(link),
        next: listings[current + 1..].iter().find(visible).map(link),
    }
}

fn link(listing: &ChapterListing) -> ChapterLink {
    ChapterLink {
        id: listing.id,
        slug: listing.slug.clone(),
        title: listing.title.clone(),
    }
}
