use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use crate::common::error::DataJobError;
use crate::server::manager::JobManager;
use crate::server::tenant::Authenticator;
use crate::transfer::messages::{ErrorResponse, JobSummary};
use crate::{JobId, TenantContext};

pub struct AppState {
    manager: Arc<JobManager>,
    authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(manager: Arc<JobManager>, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            authenticator,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/datajob", post(create_job).get(list_jobs))
        .route("/datajob/{job_id}", get(get_job))
        .with_state(state)
}

impl DataJobError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DataJobError::SubmissionRejected { .. } | DataJobError::InvalidTenant(_) => {
                StatusCode::BAD_REQUEST
            }
            DataJobError::NotFound(_) => StatusCode::NOT_FOUND,
            DataJobError::ExecutionFailed { .. } => StatusCode::BAD_GATEWAY,
            DataJobError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
            DataJobError::InvalidTransition { .. }
            | DataJobError::ConfigError(_)
            | DataJobError::IoError(_)
            | DataJobError::GenericError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DataJobError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            message: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> crate::Result<TenantContext> {
    state.authenticator.authenticate(headers).inspect_err(|error| {
        log::warn!("Rejecting unauthenticated request: {error}");
    })
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<String, DataJobError> {
    let ctx = authenticate(&state, &headers)?;
    log::info!("Received job creation request (tenant {})", ctx.tenant());

    // The creation continues in its own task, so that an abandoned request still leaves the job
    // in a terminal state. Dropping the guard cancels the in-flight submission.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let manager = state.manager.clone();
    let task_ctx = ctx.clone();
    let result = tokio::spawn(async move { manager.create_job(&task_ctx, &cancel).await })
        .await
        .map_err(|error| DataJobError::GenericError(format!("Job creation task failed: {error}")))?;

    match result {
        Ok(job_id) => Ok(format!("Job creation request successfully, id: {job_id}")),
        Err(error) => {
            log::error!("Error in submitting job (tenant {}): {error}", ctx.tenant());
            Err(error)
        }
    }
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobSummary>>, DataJobError> {
    let ctx = authenticate(&state, &headers)?;
    let records = state.manager.read_jobs(&ctx, None)?;
    Ok(Json(records.iter().map(JobSummary::from).collect()))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobSummary>>, DataJobError> {
    let ctx = authenticate(&state, &headers)?;
    let job_id = JobId::from_str(&job_id)?;
    let records = state.manager.read_jobs(&ctx, Some(&job_id))?;
    Ok(Json(records.iter().map(JobSummary::from).collect()))
}
