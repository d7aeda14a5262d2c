//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/runs`                      — Run a task to completion, timeout, or budget
//! - `POST /v1/runs/resume`               — Continue a thread from a checkpoint
//! - `GET  /v1/checkpoints/{id}`          — One checkpoint
//! - `GET  /v1/threads/{id}/checkpoints`  — A thread's checkpoints, oldest first
//! - `GET  /v1/threads/{id}/steps`        — A thread's step trace
//! - `POST /v1/subagents`                 — Spawn a subagent (returns immediately)
//! - `GET  /v1/subagents/{id}`            — Subagent record
//! - `GET  /v1/subagents/{id}/result`     — Result, or `ready: false`
//! - `POST /v1/subagents/{id}/cancel`     — Cancel a pending or running subagent

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use agentloom_agent::{CancelResponse, ResultView, RunOutcome, SpawnRequest, SpawnResponse};
use agentloom_core::checkpoint::Checkpoint;
use agentloom_core::error::{
    CheckpointError, Error, GatewayError, StepError, SubagentError,
};
use agentloom_core::step::ChainOfThoughtStep;
use agentloom_core::subagent::Subagent;
use agentloom_core::thread::ThreadId;

use crate::SharedRuntime;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(runtime: SharedRuntime) -> Router {
    Router::new()
        .route("/runs", post(run_handler))
        .route("/runs/resume", post(resume_handler))
        .route("/checkpoints/{id}", get(get_checkpoint_handler))
        .route("/threads/{id}/checkpoints", get(list_checkpoints_handler))
        .route("/threads/{id}/steps", get(list_steps_handler))
        .route("/subagents", post(spawn_subagent_handler))
        .route("/subagents/{id}", get(get_subagent_handler))
        .route("/subagents/{id}/result", get(subagent_result_handler))
        .route("/subagents/{id}/cancel", post(cancel_subagent_handler))
        .with_state(runtime)
}

// ── Errors ────────────────────────────────────────────────────────────────

/// A domain error rendered as `{"error": ...}` with a matching status.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Checkpoint(CheckpointError::NotFound(_))
            | Error::Subagent(SubagentError::NotFound(_))
            | Error::Step(StepError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Checkpoint(CheckpointError::AlreadyTerminal { .. })
            | Error::Checkpoint(CheckpointError::IterationOutOfOrder { .. })
            | Error::Subagent(SubagentError::AlreadyFinished)
            | Error::Cancelled(_) => StatusCode::CONFLICT,
            Error::Subagent(SubagentError::UnknownCapability(_)) | Error::Config { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::Gateway(GatewayError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Gateway(GatewayError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Error::Gateway(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ── Runs ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    task: String,
    /// Continue an existing thread id (omit for a fresh one).
    #[serde(default)]
    thread_id: Option<ThreadId>,
    #[serde(default)]
    max_steps: Option<u32>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    model: Option<String>,
}

async fn run_handler(
    State(runtime): State<SharedRuntime>,
    Json(payload): Json<RunRequest>,
) -> ApiResult<RunOutcome> {
    if payload.task.trim().is_empty() {
        return Err(Error::Config {
            message: "task must not be empty".into(),
        }
        .into());
    }
    if payload.max_steps == Some(0) {
        return Err(Error::Config {
            message: "maxSteps must be at least 1".into(),
        }
        .into());
    }

    let mut agent = runtime.agent.clone();
    if let Some(max_steps) = payload.max_steps {
        agent = agent.with_max_steps(max_steps);
    }
    if let Some(secs) = payload.timeout_secs {
        agent = agent.with_run_timeout(Duration::from_secs(secs));
    }
    if let Some(model) = payload.model {
        agent = agent.with_model(model);
    }

    let thread_id = payload.thread_id.unwrap_or_default();
    info!(thread_id = %thread_id, task_len = payload.task.len(), "Run requested");

    let outcome = agent.run(thread_id, &payload.task).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeRequest {
    checkpoint_id: String,
}

async fn resume_handler(
    State(runtime): State<SharedRuntime>,
    Json(payload): Json<ResumeRequest>,
) -> ApiResult<RunOutcome> {
    info!(checkpoint_id = %payload.checkpoint_id, "Resume requested");
    let outcome = runtime.agent.resume(&payload.checkpoint_id).await?;
    Ok(Json(outcome))
}

// ── Checkpoints & steps ───────────────────────────────────────────────────

async fn get_checkpoint_handler(
    State(runtime): State<SharedRuntime>,
    Path(id): Path<String>,
) -> ApiResult<Checkpoint> {
    runtime
        .checkpoints
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::Checkpoint(CheckpointError::NotFound(id)).into())
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointListResponse {
    thread_id: ThreadId,
    count: usize,
    checkpoints: Vec<Checkpoint>,
}

async fn list_checkpoints_handler(
    State(runtime): State<SharedRuntime>,
    Path(id): Path<String>,
) -> ApiResult<CheckpointListResponse> {
    let thread_id = ThreadId::from(id.as_str());
    let checkpoints = runtime.checkpoints.list(&thread_id).await?;
    Ok(Json(CheckpointListResponse {
        thread_id,
        count: checkpoints.len(),
        checkpoints,
    }))
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepListResponse {
    thread_id: ThreadId,
    count: usize,
    steps: Vec<ChainOfThoughtStep>,
}

async fn list_steps_handler(
    State(runtime): State<SharedRuntime>,
    Path(id): Path<String>,
) -> ApiResult<StepListResponse> {
    let thread_id = ThreadId::from(id.as_str());
    let steps = runtime.steps.get_steps(&thread_id).await?;
    Ok(Json(StepListResponse {
        thread_id,
        count: steps.len(),
        steps,
    }))
}

// ── Subagents ─────────────────────────────────────────────────────────────

async fn spawn_subagent_handler(
    State(runtime): State<SharedRuntime>,
    Json(payload): Json<SpawnRequest>,
) -> Result<(StatusCode, Json<SpawnResponse>), ApiError> {
    let response = runtime.supervisor.spawn(payload).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_subagent_handler(
    State(runtime): State<SharedRuntime>,
    Path(id): Path<String>,
) -> ApiResult<Subagent> {
    runtime
        .supervisor
        .get_status(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::Subagent(SubagentError::NotFound(id)).into())
}

async fn subagent_result_handler(
    State(runtime): State<SharedRuntime>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ResultView>), ApiError> {
    let view = runtime.supervisor.get_result(&id).await?;
    let status = if view.found {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(view)))
}

async fn cancel_subagent_handler(
    State(runtime): State<SharedRuntime>,
    Path(id): Path<String>,
) -> ApiResult<CancelResponse> {
    Ok(Json(runtime.supervisor.cancel(&id).await?))
}

// ── Tests ─────────────────────────────────────────────────────────────────
