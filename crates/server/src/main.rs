//! Stand-in job executor for local runs of the visualization client.
//!
//! Serves the same `/api` surface as the real executor, but jobs only walk
//! through their stages on a timer and the artifacts are canned.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::JobId,
    error::ErrorBody,
    protocol::{CodeResponse, GenerateRequest, GenerateResponse, SolutionResponse, StatusResponse},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod jobs;

use app_state::AppState;
use config::load_settings;
use jobs::{ArtifactError, JobTable};

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorBody>)>;

/// Placeholder body for the video endpoint; nothing is actually rendered.
const PLACEHOLDER_VIDEO: &[u8] = b"";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let state = AppState {
        jobs: JobTable::default(),
        stage_duration: settings.stage_duration(),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, stage_duration_ms = settings.stage_duration_ms, "demo executor listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/generate", post(generate))
        .route("/api/status/:job_id", get(job_status))
        .route("/api/solution/:job_id", get(job_solution))
        .route("/api/code/:job_id", get(job_code))
        .route("/api/video/:job_id", get(job_video))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody::new(message)))
}

fn artifact_error(error: ArtifactError) -> (StatusCode, Json<ErrorBody>) {
    match error {
        ArtifactError::UnknownJob => error_response(StatusCode::NOT_FOUND, "Job not found"),
        ArtifactError::NotReady => error_response(StatusCode::CONFLICT, "Job not completed yet"),
    }
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    if req.prompt.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "No prompt provided"));
    }
    let job_id = state.jobs.create(&req.prompt, state.stage_duration).await;
    info!(%job_id, prompt = %req.prompt.trim(), "job created");
    Ok(Json(GenerateResponse { job_id }))
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    state
        .jobs
        .status(&JobId::new(job_id), state.stage_duration)
        .await
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Job not found"))
}

async fn job_solution(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<SolutionResponse>> {
    let solution = state
        .jobs
        .solution(&JobId::new(job_id), state.stage_duration)
        .await
        .map_err(artifact_error)?;
    Ok(Json(SolutionResponse { solution }))
}

async fn job_code(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CodeResponse>> {
    let manim_code = state
        .jobs
        .code(&JobId::new(job_id), state.stage_duration)
        .await
        .map_err(artifact_error)?;
    Ok(Json(CodeResponse { manim_code }))
}

async fn job_video(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .jobs
        .video_ready(&JobId::new(job_id), state.stage_duration)
        .await
        .map_err(artifact_error)?;
    Ok(([(header::CONTENT_TYPE, "video/mp4")], PLACEHOLDER_VIDEO))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
