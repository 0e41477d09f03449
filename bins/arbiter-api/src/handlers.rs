// HTTP route handlers for the Arbiter API

use arbiter_common::queue::enqueue_submission;
use arbiter_common::types::{ProblemId, Submission, SubmissionId, TestCaseId, TestCaseResult, UserId};
use arbiter_judge::{RunCodeResult, ScratchResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::metrics::RUN_DURATION;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub problem_id: ProblemId,
    pub language: String,
    pub source_code: String,
    /// Omitted means the problem's example test cases
    #[serde(default)]
    pub test_case_ids: Option<Vec<TestCaseId>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmissionRequest {
    pub problem_id: ProblemId,
    pub user_id: UserId,
    pub language: String,
    pub source_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmissionResponse {
    pub submission_id: SubmissionId,
    pub message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub submission: Submission,
    pub results: Vec<TestCaseResult>,
}

/// POST /run - Judge code against a problem's test cases without saving anything
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunCodeResult>, ApiError> {
    let _timer = RUN_DURATION.with_label_values(&["run"]).start_timer();

    let result = state
        .runner
        .run_code(
            payload.problem_id,
            &payload.language,
            &payload.source_code,
            payload.test_case_ids.as_deref(),
        )
        .await?;

    info!(
        problem_id = payload.problem_id,
        language = %payload.language,
        status = %result.status,
        passed = result.passed_test_cases,
        total = result.total_test_cases,
        "Run finished"
    );
    Ok(Json(result))
}

/// POST /scratch - Run code once against caller-supplied stdin
pub async fn run_scratch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScratchRequest>,
) -> Result<Json<ScratchResult>, ApiError> {
    let _timer = RUN_DURATION.with_label_values(&["scratch"]).start_timer();

    let result = state
        .runner
        .run_scratch(&payload.code, &payload.language, &payload.input)
        .await?;
    Ok(Json(result))
}

/// POST /submissions - Admit a submission to the judging queue
pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSubmissionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Reject unknown languages before anything is stored
    state.runner.judge().registry().get(&payload.language)?;

    let id = state.submissions.next_id().await?;
    let mut submission = Submission::new(
        id,
        payload.problem_id,
        payload.user_id,
        payload.language,
        payload.source_code,
    );
    let message_id =
        enqueue_submission(state.queue.as_ref(), state.submissions.as_ref(), &mut submission).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSubmissionResponse {
            submission_id: id,
            message_id,
        }),
    ))
}

/// GET /submissions/{id} - Submission state with the stored results of its last pass
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SubmissionId>,
) -> Result<Json<SubmissionView>, ApiError> {
    let submission = state
        .submissions
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {} not found", id)))?;
    let results = state.submissions.get_test_results(id).await?;

    Ok(Json(SubmissionView { submission, results }))
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
