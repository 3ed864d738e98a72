//! services/api/src/web/middleware.rs
//!
//! Session middleware. Every request passes through `resolve_viewer`; routes
//! that need a signed-in caller check for the viewer in their handler.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use novel_pipeline_core::domain::Viewer;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::web::state::AppState;

pub const SESSION_COOKIE: &str = "session";

/// The caller resolved from the session cookie; `None` for anonymous requests.
#[derive(Debug, Clone, Default)]
pub struct CurrentViewer(pub Option<Viewer>);

/// Middleware that resolves the session cookie to a viewer.
///
/// A missing, unknown or expired session makes the request anonymous. A store
/// failure does too: readers keep reading public chapters while the session
/// table is unreachable.
pub async fn resolve_viewer(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let viewer = match session_token(req.headers()) {
        Some(token) => match state.sessions.resolve_session(token).await {
            Ok(viewer) => {
                if viewer.is_none() {
                    debug!("Session cookie did not match a live session");
                }
                viewer
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve session; continuing anonymously");
                None
            }
        },
        None => None,
    };

    req.extensions_mut().insert(CurrentViewer(viewer));
    next.run(req).await
}

/// Extracts the session token from the `Cookie` header.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            let (name, value) = c.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
        })
}
