//! services/api/src/web/context.rs
//!
//! The per-request context every handler receives.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use novel_pipeline_core::domain::Viewer;
use uuid::Uuid;

use crate::web::middleware::CurrentViewer;

/// Who is calling, when, and under which id the request is logged.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub viewer: Option<Viewer>,
    pub now: DateTime<Utc>,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn viewer(&self) -> Option<&Viewer> {
        self.viewer.as_ref()
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let viewer = parts
            .extensions
            .get::<CurrentViewer>()
            .and_then(|current| current.0.clone());
        Ok(Self {
            viewer,
            now: Utc::now(),
            request_id: Uuid::new_v4(),
        })
    }
}
