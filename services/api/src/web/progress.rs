//! services/api/src/web/progress.rs

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use novel_pipeline_core::domain::ProgressEvent;
use novel_pipeline_core::PortError;

use crate::error::{ErrorShape, HttpError};
use crate::web::context::RequestContext;
use crate::web::protocol::{ErrorBody, ProgressDto, SaveProgressRequest, SaveProgressResponse};
use crate::web::state::AppState;

/// Save how far the caller has read into a chapter.
///
/// Stale events (lower progress at the same or an earlier chunk) are accepted
/// and ignored.
#[utoipa::path(
    post,
    path = "/ajax/save-progress",
    request_body = SaveProgressRequest,
    responses(
        (status = 200, description = "Progress saved", body = SaveProgressResponse),
        (status = 400, description = "Position or percentage out of range", body = SaveProgressResponse),
        (status = 401, description = "No signed-in caller", body = SaveProgressResponse),
        (status = 404, description = "Unknown chapter, or not visible to the caller", body = SaveProgressResponse)
    )
)]
pub async fn save_progress_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    body: Result<Json<SaveProgressRequest>, JsonRejection>,
) -> Result<Json<SaveProgressResponse>, HttpError> {
    let fail = |e: PortError| HttpError::new(e, ctx.request_id).with_shape(ErrorShape::Progress);

    let viewer = ctx.viewer().ok_or_else(|| fail(PortError::Unauthenticated))?;
    let Json(request) = body.map_err(|e| fail(PortError::InvalidInput(e.body_text())))?;

    let event = ProgressEvent {
        chapter_id: request.chapter_id,
        chunk_position: request.chunk_position,
        reading_progress: request.reading_progress,
    };
    state
        .progress
        .record(Some(viewer), event, ctx.now)
        .await
        .map_err(fail)?;

    Ok(Json(SaveProgressResponse {
        success: true,
        error: None,
    }))
}

/// The caller's saved position in a chapter, or `null`.
#[utoipa::path(
    get,
    path = "/ajax/reading-progress/{chapter_id}",
    params(("chapter_id" = i64, Path, description = "Id of the chapter.")),
    responses(
        (status = 200, description = "Saved progress, or null", body = Option<ProgressDto>),
        (status = 401, description = "No signed-in caller", body = ErrorBody),
        (status = 404, description = "Unknown chapter, or not visible to the caller", body = ErrorBody)
    )
)]
pub async fn reading_progress_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(chapter_id): Path<i64>,
) -> Result<Json<Option<ProgressDto>>, HttpError> {
    let history = state
        .progress
        .get(ctx.viewer(), chapter_id)
        .await
        .map_err(|e| HttpError::new(e, ctx.request_id))?;
    Ok(Json(history.map(Into::into)))
}
