//! HTTP route handlers.

use agentloop::coordinator::{CoordinatorError, StartedRun};
use agentloop::core::types::RunState;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::state::AppState;

/// Routes under `/api`.
pub fn api_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Run lifecycle routes under `/agent`.
pub fn agent_router() -> Router<AppState> {
    Router::new()
        .route("/launch", post(launch))
        .route("/state/{id}", get(get_state))
        .route("/provide_input", post(provide_input))
        .route("/resume", post(resume))
        .route("/recover", post(recover))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub input_prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct ProvideInputRequest {
    pub id: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub id: String,
}

/// Request failure rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Coordinator(CoordinatorError),
    /// The blocking task running the coordinator call panicked or was cancelled.
    Task(JoinError),
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self::Coordinator(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Coordinator(CoordinatorError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Coordinator(CoordinatorError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Coordinator(CoordinatorError::InvalidState { .. }) => StatusCode::BAD_REQUEST,
            Self::Coordinator(CoordinatorError::Spawn { .. } | CoordinatorError::Store(_))
            | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Coordinator(err) => err.to_string(),
            Self::Task(err) => format!("request task failed: {err}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.detail();
        if status.is_server_error() {
            error!(error = %detail, "request failed");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

type ApiResult = Result<Json<RunState>, ApiError>;

/// Coordinator calls touch the store and spawn threads; keep them off the
/// async workers.
async fn blocking<T, F>(call: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, CoordinatorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(ApiError::Task)?
        .map_err(ApiError::Coordinator)
}

/// Workers run detached; the response carries the state at start.
fn started(run: StartedRun) -> Json<RunState> {
    Json(run.state)
}

/// POST /agent/launch - create a run and start it in the background.
async fn launch(State(state): State<AppState>, Json(req): Json<LaunchRequest>) -> ApiResult {
    let coordinator = state.coordinator.clone();
    let run = blocking(move || coordinator.launch(&req.input_prompt)).await?;
    info!(run_id = %run.state.id, "launched via http");
    Ok(started(run))
}

/// GET /agent/state/{id} - last published checkpoint.
async fn get_state(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let coordinator = state.coordinator.clone();
    Ok(Json(blocking(move || coordinator.get_state(&id)).await?))
}

/// POST /agent/provide_input - answer a suspended run and continue it.
async fn provide_input(
    State(state): State<AppState>,
    Json(req): Json<ProvideInputRequest>,
) -> ApiResult {
    let coordinator = state.coordinator.clone();
    let run = blocking(move || coordinator.provide_input(&req.id, &req.answer)).await?;
    Ok(started(run))
}

/// POST /agent/resume - restart a run stopped at its step limit or failed.
async fn resume(State(state): State<AppState>, Json(req): Json<RunRequest>) -> ApiResult {
    let coordinator = state.coordinator.clone();
    Ok(started(blocking(move || coordinator.resume(&req.id)).await?))
}

/// POST /agent/recover - restart an orphaned `running` run.
async fn recover(State(state): State<AppState>, Json(req): Json<RunRequest>) -> ApiResult {
    let coordinator = state.coordinator.clone();
    Ok(started(blocking(move || coordinator.recover(&req.id)).await?))
}
