use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use epilog_core::error::Error as CoreError;
use epilog_core::model::episode::EpisodeStatus;
use epilog_core::model::link::Link;
use epilog_core::model::step::Step;
use epilog_core::model::trace::TraceEvent;
use epilog_core::query::ingest::{AppendRequest, FinishRequest, IngestRequest, IngestResponse, StepInput};
use epilog_core::query::links::LinkRequest;
use epilog_core::query::list::{EpisodeDetail, ListRequest, ListResponse};
use epilog_core::query::replay::ReplayRequest;

use crate::AppState;

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

pub struct AppError(CoreError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self.0 {
            CoreError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            CoreError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            CoreError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            CoreError::Cycle(m) => (StatusCode::CONFLICT, m.clone()),
            CoreError::Timeout(m) => (StatusCode::GATEWAY_TIMEOUT, m.clone()),
            other => {
                tracing::error!("internal error: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({"error": msg}))).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        AppError(e)
    }
}

// ---------------------------------------------------------------------------
// Query / body helper structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AppendBody {
    pub steps: Vec<StepInput>,
}

#[derive(Debug, Deserialize)]
pub struct FinishBody {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplayParams {
    pub from_index: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReplayPayload {
    pub episode_id: Uuid,
    pub steps: Vec<Step>,
}

#[derive(Debug, Serialize)]
pub struct AncestryPayload {
    pub episode_id: Uuid,
    pub ancestors: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/episodes -- ingest a complete episode with its steps.
pub async fn ingest_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let response = state.engine.ingest(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /v1/episodes?agent_id=...&status=...&since=...&until=...&cursor=...&limit=...
pub async fn list_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<EpisodeStatus>)
        .transpose()?;

    let response = state
        .engine
        .list(ListRequest {
            agent_id: params.agent_id,
            status,
            since: params.since,
            until: params.until,
            cursor: params.cursor,
            limit: params.limit,
        })
        .await?;
    Ok(Json(response))
}

/// GET /v1/episodes/{id} -- full episode with ordered steps.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EpisodeDetail>, AppError> {
    let detail = state.engine.get(id).await?;
    Ok(Json(detail))
}

/// POST /v1/episodes/{id}/steps -- append further steps.
pub async fn append_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AppendBody>,
) -> Result<Json<epilog_core::query::ingest::AppendResponse>, AppError> {
    let response = state
        .engine
        .append(AppendRequest {
            episode_id: id,
            steps: body.steps,
        })
        .await?;
    Ok(Json(response))
}

/// POST /v1/episodes/{id}/finish -- transition to a terminal status.
pub async fn finish_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<FinishBody>,
) -> Result<StatusCode, AppError> {
    let status: EpisodeStatus = body.status.parse()?;
    state
        .engine
        .finish(FinishRequest {
            episode_id: id,
            status,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/episodes/{id}/replay?from_index=...
pub async fn replay_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ReplayParams>,
) -> Result<Json<ReplayPayload>, AppError> {
    let replay = state
        .engine
        .replay(ReplayRequest {
            episode_id: id,
            from_index: params.from_index,
        })
        .await?;
    Ok(Json(ReplayPayload {
        episode_id: id,
        steps: replay.collect(),
    }))
}

/// POST /v1/links -- add a typed causal relation.
pub async fn link_handler(
    State(state): State<AppState>,
    Json(request): Json<LinkRequest>,
) -> Result<(StatusCode, Json<Link>), AppError> {
    let link = state.engine.link(request).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// GET /v1/episodes/{id}/ancestry
pub async fn ancestry_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AncestryPayload>, AppError> {
    let ancestors = state.engine.ancestry(id).await?;
    Ok(Json(AncestryPayload {
        episode_id: id,
        ancestors,
    }))
}

/// GET /v1/episodes/{id}/children
pub async fn children_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Uuid>>, AppError> {
    let children = state.engine.children(id).await?;
    Ok(Json(children.into_iter().collect()))
}

/// POST /v1/traces -- buffer one raw trace event for grouping.
pub async fn trace_handler(
    State(state): State<AppState>,
    Json(event): Json<TraceEvent>,
) -> Result<StatusCode, AppError> {
    state.grouper.offer(event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /v1/health -- liveness plus stored-episode count.
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.engine.episode_count().await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": "epilog",
        "version": env!("CARGO_PKG_VERSION"),
        "episodes_stored": count,
    })))
}
