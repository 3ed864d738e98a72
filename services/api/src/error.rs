//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how failures
//! are rendered to HTTP clients.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use novel_pipeline_core::ports::PortError;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::web::protocol::{ErrorBody, FormEnvelope, SaveProgressResponse};

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from the pipeline.
    #[error(transparent)]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error from running the schema migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Port(e) => port_status(e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn port_status(error: &PortError) -> StatusCode {
    match error {
        PortError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PortError::Unauthenticated => StatusCode::UNAUTHORIZED,
        PortError::Forbidden(_) => StatusCode::FORBIDDEN,
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Conflict(_) => StatusCode::CONFLICT,
        PortError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Which JSON body a failed request answers with.
#[derive(Debug, Clone, Default)]
pub enum ErrorShape {
    /// `{error, request_id}` for read endpoints.
    #[default]
    Data,
    /// `{success: false, message, errors}` for form submissions.
    Form(BTreeMap<String, Vec<String>>),
    /// `{success: false, error}` for progress saves.
    Progress,
}

/// A failed request, tagged with the id it is logged under.
#[derive(Debug)]
pub struct HttpError {
    pub error: ApiError,
    pub request_id: Uuid,
    pub shape: ErrorShape,
}

impl HttpError {
    pub fn new(error: impl Into<ApiError>, request_id: Uuid) -> Self {
        Self {
            error: error.into(),
            request_id,
            shape: ErrorShape::Data,
        }
    }

    pub fn with_shape(mut self, shape: ErrorShape) -> Self {
        self.shape = shape;
        self
    }

    /// The message shown to the client. Server-side failures are opaque apart
    /// from the correlation id.
    fn public_message(&self, status: StatusCode) -> String {
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            format!("Internal server error (reference {})", self.request_id)
        } else {
            self.error.to_string()
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            error!(request_id = %self.request_id, error = %self.error, "Request failed");
        } else {
            warn!(request_id = %self.request_id, status = status.as_u16(), error = %self.error, "Request rejected");
        }
        let message = self.public_message(status);

        match self.shape {
            ErrorShape::Data => (
                status,
                Json(ErrorBody {
                    error: message,
                    request_id: self.request_id,
                }),
            )
                .into_response(),
            ErrorShape::Form(errors) => (
                status,
                Json(FormEnvelope {
                    success: false,
                    message: Some(message),
                    errors: (!errors.is_empty()).then_some(errors),
                }),
            )
                .into_response(),
            ErrorShape::Progress => (
                status,
                Json(SaveProgressResponse {
                    success: false,
                    error: Some(message),
                }),
            )
                .into_response(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        HttpError::new(self, Uuid::new_v4()).into_response()
    }
}
