use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sandpit_runtime::{ExecutionRequest, ExecutionResult, Executor, RuntimeError, SessionSupervisor};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use crate::files;
use crate::workspace::{Workspace, WorkspaceError};
use crate::ws;

#[derive(Clone)]
pub struct ApiState {
    pub executor: Arc<Executor>,
    pub sessions: Arc<SessionSupervisor>,
    pub workspace: Workspace,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/languages", get(list_languages))
        .route("/run", post(run_code))
        .route("/run/python", post(run_python))
        .route("/files", get(files::list_files))
        .route("/files/open", post(files::open_file))
        .route("/files/save", post(files::save_file))
        .route("/files/upload", post(files::upload_files))
        .route("/ws/python", get(ws::python_session))
        .route("/ws/run", get(ws::run_session))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_languages(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "languages": state.executor.languages().describe() }))
}

async fn run_code(
    State(state): State<ApiState>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let Json(request) = payload?;
    debug!("Run request: language={}", request.language);

    let result = state.executor.execute(request).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct PythonRunRequest {
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

async fn run_python(
    State(state): State<ApiState>,
    payload: Result<Json<PythonRunRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let Json(body) = payload?;

    let request = ExecutionRequest {
        language: "python".to_string(),
        code: body.code,
        stdin: body.stdin,
        timeout_secs: body.timeout,
    };

    let result = state.executor.execute(request).await?;
    Ok(Json(result))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::InvalidPath(_) => ApiError::BadRequest(err.to_string()),
            WorkspaceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            WorkspaceError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}
