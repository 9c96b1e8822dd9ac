use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::AuditLog;
use crate::channel::{buffered, streaming};
use crate::config::Config;
use crate::dispatch::async_poll::Cadence;
use crate::dispatch::upstream::UpstreamClient;
use crate::dispatch::{JobHandle, required};
use crate::error::BridgeError;
use crate::orchestrator::Orchestrator;
use crate::response::{BufferedResponse, StatusResponse};
use crate::store::TenderStore;

/// Shared state for axum handlers. Holds no per-request data: every bridge
/// call owns its own poll session.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator<UpstreamClient>>,
}

impl AppState {
    pub fn new(
        upstream: UpstreamClient,
        store: Arc<dyn TenderStore>,
        audit: AuditLog,
        cadence: Cadence,
        shutdown: CancellationToken,
    ) -> Self {
        let orchestrator = Orchestrator::new(Arc::new(upstream), store, audit, cadence, shutdown);
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn TenderStore>,
        shutdown: CancellationToken,
    ) -> Result<Self, BridgeError> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        Ok(Self::new(
            upstream,
            store,
            AuditLog::new(config.audit_dir.clone()),
            config.poll.cadence(),
            shutdown,
        ))
    }
}

/// Body of the single-shot status endpoint.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub thread_id: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRequest {
    #[serde(alias = "thread_id")]
    pub thread_id: Option<String>,
    #[serde(alias = "project_id")]
    pub project_id: Option<String>,
    pub prompt: Option<String>,
    #[serde(alias = "tender_id")]
    pub tender_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    #[serde(alias = "thread_id")]
    pub thread_id: Option<String>,
    #[serde(alias = "project_id")]
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(alias = "thread_id")]
    pub thread_id: Option<String>,
    #[serde(alias = "project_id")]
    pub project_id: Option<String>,
    pub prompt: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/ai/status", post(check_status))
        .route("/api/ai/follow-up", post(follow_up))
        .route("/api/ai/stream", get(stream_by_query))
        .route("/api/ai/stream/{thread_id}", get(stream_by_path))
        .route("/api/tenders/{tender_id}/proposal", post(generate_proposal))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until `shutdown` fires, then drain in-flight requests.
pub async fn serve(
    listen_addr: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), BridgeError> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| BridgeError::Configuration(format!("failed to bind {listen_addr}: {e}")))?;

    tracing::info!("listening on {listen_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| BridgeError::Other(format!("server error: {e}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Single-shot status check: exactly one upstream call.
///
/// An unfinished job is a normal 200 reply. Missing ids are 400. A failed
/// upstream status call is 502 with the error description in the body.
async fn check_status(
    State(state): State<AppState>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, BridgeError> {
    let Json(req) = payload.map_err(|e| BridgeError::Validation(e.body_text()))?;
    let handle = JobHandle::new(req.thread_id, req.project_id)?;
    let orchestrator = &state.orchestrator;
    let response =
        buffered::single_shot(orchestrator.api().as_ref(), &handle, orchestrator.cadence()).await?;
    Ok(Json(response))
}

async fn follow_up(
    State(state): State<AppState>,
    payload: Result<Json<FollowUpRequest>, JsonRejection>,
) -> Result<Json<BufferedResponse>, BridgeError> {
    let Json(req) = payload.map_err(|e| BridgeError::Validation(e.body_text()))?;
    let handle = JobHandle::new(req.thread_id, req.project_id)?.with_correlation(req.tender_id);
    let prompt = required("prompt", req.prompt)?;
    let response = state.orchestrator.follow_up(handle, &prompt).await?;
    Ok(Json(response))
}

async fn stream_by_query(
    State(state): State<AppState>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> Response {
    match params {
        Ok(Query(p)) => open_stream(&state, p.thread_id, p.project_id),
        Err(e) => BridgeError::Validation(e.body_text()).into_response(),
    }
}

async fn stream_by_path(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> Response {
    match params {
        Ok(Query(p)) => open_stream(&state, Some(thread_id), p.project_id),
        Err(e) => BridgeError::Validation(e.body_text()).into_response(),
    }
}

/// Validation happens before the stream opens, so a bad request is a plain
/// 400 and never touches upstream.
fn open_stream(state: &AppState, thread_id: Option<String>, project_id: Option<String>) -> Response {
    let handle = match JobHandle::new(thread_id, project_id) {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };
    let orchestrator = &state.orchestrator;
    streaming::sse_response(
        orchestrator.api().clone(),
        handle,
        *orchestrator.cadence(),
        orchestrator.shutdown_token().child_token(),
    )
    .into_response()
}

async fn generate_proposal(
    State(state): State<AppState>,
    Path(tender_id): Path<String>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<BufferedResponse>, BridgeError> {
    let Json(req) = payload.map_err(|e| BridgeError::Validation(e.body_text()))?;
    let handle = JobHandle::new(req.thread_id, req.project_id)?;
    let response = state
        .orchestrator
        .generate_proposal(&tender_id, handle, req.prompt)
        .await?;
    Ok(Json(response))
}
