use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use serde::Deserialize;
use utoipa::ToSchema;

use super::ErrorBody;
use crate::certificate::Certificate;
use crate::error::Result;
use crate::progress::{AccessMap, ProgressRecord};
use crate::service::{
    CompletionStatus, FinalAssessmentSubmission, ProgressService, QuizSubmission, WatchTimeAck,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompleteLectureRequest {
    pub chapter_index: usize,
    pub lecture_index: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAnswersRequest {
    pub chapter_index: usize,
    /// Chosen option index per question, in question order
    pub answers: Vec<usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WatchTimeRequest {
    pub chapter_index: usize,
    pub lecture_index: usize,
    /// Watched seconds since the previous flush, never an absolute value
    pub delta_seconds: u32,
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}",
    method(get),
    tag = "progress",
    params(("student_id" = i64, Path, description = "Student id")),
    responses(
        (status = 200, description = "Progress of every enrolled course", body = Vec<ProgressRecord>),
        (status = 404, description = "Unknown student", body = ErrorBody)
    )
)]
pub async fn list_progress(
    State(service): State<Arc<ProgressService>>,
    Path(student_id): Path<i64>,
) -> Result<Json<Vec<ProgressRecord>>> {
    Ok(Json(service.list_progress(student_id).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}",
    method(get),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    responses(
        (status = 200, description = "Progress record, created on first access", body = ProgressRecord),
        (status = 404, description = "Unknown student or course", body = ErrorBody),
        (status = 502, description = "Course outline unavailable", body = ErrorBody)
    )
)]
pub async fn get_progress(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
) -> Result<Json<ProgressRecord>> {
    Ok(Json(service.get_progress(student_id, course_id).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}/access",
    method(get),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    responses(
        (status = 200, description = "Which lectures, quizzes and final assessments are open", body = AccessMap),
        (status = 404, description = "Unknown student or course", body = ErrorBody)
    )
)]
pub async fn get_access_map(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
) -> Result<Json<AccessMap>> {
    Ok(Json(service.access_map(student_id, course_id).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}/lectures/complete",
    method(post),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    request_body = CompleteLectureRequest,
    responses(
        (status = 200, description = "Lecture completed", body = CompletionStatus),
        (status = 403, description = "Earlier lectures or chapters are not completed", body = ErrorBody),
        (status = 404, description = "Unknown student, course or lecture", body = ErrorBody),
        (status = 409, description = "Concurrent writes kept conflicting", body = ErrorBody),
        (status = 422, description = "Malformed request body", body = ErrorBody)
    )
)]
pub async fn complete_lecture(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
    req: std::result::Result<Json<CompleteLectureRequest>, JsonRejection>,
) -> Result<Json<CompletionStatus>> {
    let Json(req) = req?;
    let CompleteLectureRequest { chapter_index, lecture_index } = req;
    let status = service
        .complete_lecture(student_id, course_id, chapter_index, lecture_index)
        .await?;
    Ok(Json(status))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}/quizzes/submit",
    method(post),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    request_body = SubmitAnswersRequest,
    responses(
        (status = 200, description = "Quizzes graded", body = QuizSubmission),
        (status = 403, description = "Lectures of the chapter are not completed", body = ErrorBody),
        (status = 404, description = "Unknown student, course or chapter", body = ErrorBody),
        (status = 422, description = "Answer count does not match question count", body = ErrorBody)
    )
)]
pub async fn submit_quiz(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
    req: std::result::Result<Json<SubmitAnswersRequest>, JsonRejection>,
) -> Result<Json<QuizSubmission>> {
    let Json(req) = req?;
    let submission = service
        .submit_quiz(student_id, course_id, req.chapter_index, &req.answers)
        .await?;
    Ok(Json(submission))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}/final_assessment/submit",
    method(post),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    request_body = SubmitAnswersRequest,
    responses(
        (status = 200, description = "Final assessment graded", body = FinalAssessmentSubmission),
        (status = 403, description = "Lectures or quizzes of the chapter are not done", body = ErrorBody),
        (status = 404, description = "Chapter has no final assessment", body = ErrorBody),
        (status = 422, description = "Answer count does not match question count", body = ErrorBody)
    )
)]
pub async fn submit_final_assessment(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
    req: std::result::Result<Json<SubmitAnswersRequest>, JsonRejection>,
) -> Result<Json<FinalAssessmentSubmission>> {
    let Json(req) = req?;
    let submission = service
        .submit_final_assessment(student_id, course_id, req.chapter_index, &req.answers)
        .await?;
    Ok(Json(submission))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}/watch_time",
    method(post),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    request_body = WatchTimeRequest,
    responses(
        (status = 200, description = "Delta added", body = WatchTimeAck),
        (status = 404, description = "Unknown student, course or lecture", body = ErrorBody),
        (status = 422, description = "Malformed request body", body = ErrorBody)
    )
)]
pub async fn add_watch_time(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
    req: std::result::Result<Json<WatchTimeRequest>, JsonRejection>,
) -> Result<Json<WatchTimeAck>> {
    let Json(req) = req?;
    let WatchTimeRequest { chapter_index, lecture_index, delta_seconds } = req;
    let ack = service
        .add_watch_time(student_id, course_id, chapter_index, lecture_index, delta_seconds)
        .await?;
    Ok(Json(ack))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}/certificate",
    method(get),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    responses(
        (status = 200, description = "Issued certificate", body = Certificate),
        (status = 404, description = "No certificate issued yet", body = ErrorBody)
    )
)]
pub async fn get_certificate(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
) -> Result<Json<Certificate>> {
    Ok(Json(service.get_certificate(student_id, course_id).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/{student_id}/{course_id}/certificate/retry",
    method(post),
    tag = "progress",
    params(
        ("student_id" = i64, Path, description = "Student id"),
        ("course_id" = i64, Path, description = "Course id")
    ),
    responses(
        (status = 200, description = "Certification state after the retry", body = CompletionStatus),
        (status = 502, description = "Certificate issuer unavailable", body = ErrorBody)
    )
)]
pub async fn retry_certification(
    State(service): State<Arc<ProgressService>>,
    Path((student_id, course_id)): Path<(i64, i64)>,
) -> Result<Json<CompletionStatus>> {
    Ok(Json(service.retry_certification(student_id, course_id).await?))
}

pub fn get_progress_scope() -> Router<Arc<ProgressService>> {
    Router::new().nest(
        "/progress",
        Router::new()
            .route("/{student_id}", get(list_progress))
            .route("/{student_id}/{course_id}", get(get_progress))
            .route("/{student_id}/{course_id}/access", get(get_access_map))
            .route("/{student_id}/{course_id}/lectures/complete", post(complete_lecture))
            .route("/{student_id}/{course_id}/quizzes/submit", post(submit_quiz))
            .route(
                "/{student_id}/{course_id}/final_assessment/submit",
                post(submit_final_assessment),
            )
            .route("/{student_id}/{course_id}/watch_time", post(add_watch_time))
            .route("/{student_id}/{course_id}/certificate", get(get_certificate))
            .route("/{student_id}/{course_id}/certificate/retry", post(retry_certification)),
    )
}
