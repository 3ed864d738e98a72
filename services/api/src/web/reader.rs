//! services/api/src/web/reader.rs
//!
//! Read-side handlers: the chapter page, follow-up chunk windows and the
//! table of contents.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::error::HttpError;
use crate::web::context::RequestContext;
use crate::web::protocol::{
    ChapterPageResponse, ErrorBody, LoadChunksQuery, LoadChunksResponse, NovelInfo,
    TableOfContentsResponse,
};
use crate::web::state::AppState;

/// Open a chapter.
///
/// Returns the first window of chunks, neighbouring chapters and, for a
/// signed-in reader, their saved progress.
#[utoipa::path(
    get,
    path = "/novels/{novel_slug}/chapter/{chapter_slug}",
    params(
        ("novel_slug" = String, Path, description = "Slug of the novel."),
        ("chapter_slug" = String, Path, description = "Slug of the chapter.")
    ),
    responses(
        (status = 200, description = "The chapter's first window", body = ChapterPageResponse),
        (status = 404, description = "Unknown chapter, or not visible to the caller", body = ErrorBody),
        (status = 503, description = "Store unavailable; retry", body = ErrorBody)
    )
)]
pub async fn chapter_page_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path((novel_slug, chapter_slug)): Path<(String, String)>,
) -> Result<Json<ChapterPageResponse>, HttpError> {
    let page = state
        .reader
        .first_window(&novel_slug, &chapter_slug, ctx.viewer())
        .await
        .map_err(|e| HttpError::new(e, ctx.request_id))?;
    Ok(Json(page.into()))
}

/// Load the next window of chunks while the reader scrolls.
#[utoipa::path(
    get,
    path = "/ajax/load-chunks/{chapter_id}",
    params(
        ("chapter_id" = i64, Path, description = "Id of the chapter."),
        LoadChunksQuery
    ),
    responses(
        (status = 200, description = "A window of chunks", body = LoadChunksResponse),
        (status = 400, description = "Invalid start or limit", body = ErrorBody),
        (status = 404, description = "Unknown chapter, or not visible to the caller", body = ErrorBody)
    )
)]
pub async fn load_chunks_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(chapter_id): Path<i64>,
    Query(query): Query<LoadChunksQuery>,
) -> Result<Json<LoadChunksResponse>, HttpError> {
    let page = state
        .reader
        .next_window(chapter_id, query.start, query.limit, ctx.viewer())
        .await
        .map_err(|e| HttpError::new(e, ctx.request_id))?;
    Ok(Json(page.into()))
}

/// List the chapters of a novel the caller may open, in reading order.
#[utoipa::path(
    get,
    path = "/novels/{novel_slug}/chapters",
    params(("novel_slug" = String, Path, description = "Slug of the novel.")),
    responses(
        (status = 200, description = "Table of contents", body = TableOfContentsResponse),
        (status = 404, description = "Unknown novel, or not visible to the caller", body = ErrorBody)
    )
)]
pub async fn table_of_contents_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(novel_slug): Path<String>,
) -> Result<Json<TableOfContentsResponse>, HttpError> {
    let (novel, chapters) = state
        .reader
        .table_of_contents(&novel_slug, ctx.viewer())
        .await
        .map_err(|e| HttpError::new(e, ctx.request_id))?;
    Ok(Json(TableOfContentsResponse {
        novel: NovelInfo {
            id: novel.id,
            slug: novel.slug,
            name: novel.name,
        },
        chapters: chapters.into_iter().map(Into::into).collect(),
    }))
}
