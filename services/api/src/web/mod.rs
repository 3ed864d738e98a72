pub mod chapters;
pub mod context;
pub mod middleware;
pub mod progress;
pub mod protocol;
pub mod reader;
pub mod rest;
pub mod state;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::web::state::AppState;

pub use middleware::resolve_viewer;

/// Chapter bodies arrive inline in JSON.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Builds the application router with every route and layer.
pub fn router(state: Arc<AppState>) -> Result<Router, ApiError> {
    let origin = state
        .config
        .cors_allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS origin: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    let reader_routes = Router::new()
        .route(
            "/novels/{novel_slug}/chapter/{chapter_slug}",
            get(reader::chapter_page_handler),
        )
        .route(
            "/novels/{novel_slug}/chapters",
            get(reader::table_of_contents_handler),
        )
        .route(
            "/ajax/load-chunks/{chapter_id}",
            get(reader::load_chunks_handler),
        )
        .route("/ajax/save-progress", post(progress::save_progress_handler))
        .route(
            "/ajax/reading-progress/{chapter_id}",
            get(progress::reading_progress_handler),
        );

    let author_routes = Router::new()
        .route("/{novel_slug}/add-chapter", post(chapters::add_chapter_handler))
        .route(
            "/{novel_slug}/chapter/{chapter_slug}/content",
            post(chapters::replace_content_handler),
        )
        .route(
            "/{novel_slug}/chapter/{chapter_slug}/delete",
            post(chapters::delete_chapter_handler),
        );

    Ok(Router::new()
        .merge(reader_routes)
        .merge(author_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            resolve_viewer,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
