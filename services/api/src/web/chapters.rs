//! services/api/src/web/chapters.rs
//!
//! Author-side handlers. Successful form submissions redirect with
//! `303 See Other`; failures answer with the form envelope.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Redirect,
    Json,
};
use novel_pipeline_core::{validate_draft, FieldError, PortError};

use crate::error::{ErrorShape, HttpError};
use crate::web::context::RequestContext;
use crate::web::protocol::{
    field_errors, ChapterForm, ContentRequest, ContentResponse, FormEnvelope,
};
use crate::web::state::AppState;

fn form_error(e: impl Into<crate::error::ApiError>, ctx: &RequestContext) -> HttpError {
    HttpError::new(e, ctx.request_id).with_shape(ErrorShape::Form(Default::default()))
}

/// Add a chapter to a novel, optionally in a new volume.
#[utoipa::path(
    post,
    path = "/{novel_slug}/add-chapter",
    params(("novel_slug" = String, Path, description = "Slug of the novel.")),
    request_body = ChapterForm,
    responses(
        (status = 303, description = "Created; `Location` points at the new chapter"),
        (status = 400, description = "Form errors", body = FormEnvelope),
        (status = 401, description = "No signed-in caller", body = FormEnvelope),
        (status = 403, description = "Caller is not the author, or the novel is not approved", body = FormEnvelope),
        (status = 404, description = "Unknown novel", body = FormEnvelope),
        (status = 409, description = "Duplicate title or volume name", body = FormEnvelope)
    )
)]
pub async fn add_chapter_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(novel_slug): Path<String>,
    body: Result<Json<ChapterForm>, JsonRejection>,
) -> Result<Redirect, HttpError> {
    if ctx.viewer.is_none() {
        return Err(form_error(PortError::Unauthenticated, &ctx));
    }
    let Json(form) = body.map_err(|e| form_error(PortError::InvalidInput(e.body_text()), &ctx))?;
    let draft = form.into_draft().map_err(|field| {
        let message = format!("{}: {}", field.field, field.message);
        HttpError::new(PortError::InvalidInput(message), ctx.request_id)
            .with_shape(ErrorShape::Form(field_errors(&[field])))
    })?;
    let errors = validate_draft(&draft);

    let created = state
        .chapters
        .add_chapter(ctx.viewer(), &novel_slug, draft, ctx.now)
        .await
        .map_err(|e| {
            // Drafts that pass validation can only be rejected for their volume.
            let fields = match &e {
                PortError::InvalidInput(_) if !errors.is_empty() => field_errors(&errors),
                PortError::InvalidInput(message) => field_errors(&[FieldError {
                    field: "volume_choice",
                    message: message
                        .strip_prefix("volume_choice: ")
                        .unwrap_or(message)
                        .to_string(),
                }]),
                _ => Default::default(),
            };
            HttpError::new(e, ctx.request_id).with_shape(ErrorShape::Form(fields))
        })?;

    Ok(Redirect::to(&format!(
        "/novels/{}/chapter/{}",
        created.novel.slug, created.chapter.slug
    )))
}

/// Replace the body of an existing chapter and re-chunk it.
#[utoipa::path(
    post,
    path = "/{novel_slug}/chapter/{chapter_slug}/content",
    params(
        ("novel_slug" = String, Path, description = "Slug of the novel."),
        ("chapter_slug" = String, Path, description = "Slug of the chapter.")
    ),
    request_body = ContentRequest,
    responses(
        (status = 200, description = "Chapter re-chunked", body = ContentResponse),
        (status = 401, description = "No signed-in caller", body = FormEnvelope),
        (status = 403, description = "Caller may not edit this chapter", body = FormEnvelope),
        (status = 404, description = "Unknown chapter", body = FormEnvelope),
        (status = 409, description = "Another replacement is in progress", body = FormEnvelope)
    )
)]
pub async fn replace_content_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path((novel_slug, chapter_slug)): Path<(String, String)>,
    body: Result<Json<ContentRequest>, JsonRejection>,
) -> Result<Json<ContentResponse>, HttpError> {
    if ctx.viewer.is_none() {
        return Err(form_error(PortError::Unauthenticated, &ctx));
    }
    let Json(request) = body.map_err(|e| form_error(PortError::InvalidInput(e.body_text()), &ctx))?;

    let outcome = state
        .chapters
        .replace_content(
            ctx.viewer(),
            &novel_slug,
            &chapter_slug,
            &request.content,
            request.format.unwrap_or_default().into(),
            ctx.now,
        )
        .await
        .map_err(|e| form_error(e, &ctx))?;

    Ok(Json(ContentResponse {
        success: true,
        chunk_count: outcome.chunk_count,
        word_count: outcome.word_count,
    }))
}

/// Soft-delete a chapter and drop its chunks.
#[utoipa::path(
    post,
    path = "/{novel_slug}/chapter/{chapter_slug}/delete",
    params(
        ("novel_slug" = String, Path, description = "Slug of the novel."),
        ("chapter_slug" = String, Path, description = "Slug of the chapter.")
    ),
    responses(
        (status = 303, description = "Deleted; `Location` points at the table of contents"),
        (status = 401, description = "No signed-in caller", body = FormEnvelope),
        (status = 403, description = "Caller may not delete this chapter", body = FormEnvelope),
        (status = 404, description = "Unknown chapter", body = FormEnvelope)
    )
)]
pub async fn delete_chapter_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path((novel_slug, chapter_slug)): Path<(String, String)>,
) -> Result<Redirect, HttpError> {
    let novel = state
        .chapters
        .delete_chapter(ctx.viewer(), &novel_slug, &chapter_slug, ctx.now)
        .await
        .map_err(|e| form_error(e, &ctx))?;
    Ok(Redirect::to(&format!("/novels/{}/chapters", novel.slug)))
}
