pub mod progress;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{OpenApi, ToSchema};

use crate::error::Error;
use crate::service::ProgressService;

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// `not_found`, `forbidden`, `validation`, `conflict`, `external_dependency` or `internal`
    pub error: String,
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::ExternalDependency(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Migrate(_) | Error::Json(_) | Error::Fatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::validation(format!("malformed request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {}", self);
        }
        let body = ErrorBody { error: self.kind().to_string(), message: self.to_string() };
        (status, Json(body)).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        progress::list_progress,
        progress::get_progress,
        progress::get_access_map,
        progress::complete_lecture,
        progress::submit_quiz,
        progress::submit_final_assessment,
        progress::add_watch_time,
        progress::get_certificate,
        progress::retry_certification,
    ),
    components(schemas(ErrorBody)),
    tags((name = "progress", description = "Learner progress, gating, grading and certification"))
)]
pub struct ApiDoc;

/// All routes under `/api`, with the service as state.
pub fn router(service: Arc<ProgressService>) -> Router {
    Router::new()
        .nest("/api", progress::get_progress_scope())
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_status_codes() {
        assert_eq!(Error::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::validation("x").status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(Error::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(Error::ExternalDependency("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            Error::Fatal(anyhow::anyhow!("x")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn openapi_lists_progress_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/progress/{student_id}/{course_id}"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/progress/{student_id}/{course_id}/watch_time"));
        assert_eq!(paths.len(), 9);
    }
}
