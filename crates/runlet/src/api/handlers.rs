//! Process API handlers.
//!
//! Every handler except `health` runs behind the auth middleware and acts on
//! the caller's own processes only.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use runlet_protocol::{
    HealthResponse, ListResponse, LogResponse, ProcessRef, PurgeResponse, StartRequest,
    StatusResponse, StopResponse,
};
use serde::Deserialize;
use tracing::{info, instrument};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::CurrentUser;

/// Query string of `/status` and `/log`.
#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

impl IdQuery {
    fn id(&self) -> ApiResult<&str> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::bad_request("missing get parameter id"))
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[instrument(skip(state, payload), fields(user = user.id))]
pub async fn start(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<Json<ProcessRef>> {
    let Json(request) = payload?;
    let id = state.manager.start(request.command.trim(), user.id)?;
    info!(process_id = %id, "Started process");
    Ok(Json(ProcessRef {
        uuid: id.to_string(),
    }))
}

#[instrument(skip(state, payload), fields(user = user.id))]
pub async fn stop(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<ProcessRef>, JsonRejection>,
) -> ApiResult<Json<StopResponse>> {
    let Json(request) = payload?;
    state.manager.stop(request.uuid.trim(), user.id).await?;
    Ok(Json(StopResponse::ok()))
}

#[instrument(skip(state), fields(user = user.id))]
pub async fn list(State(state): State<AppState>, user: CurrentUser) -> Json<ListResponse> {
    let processes = state.manager.list(user.id);
    info!(count = processes.len(), "Listed processes");
    Json(ListResponse::new(processes))
}

#[instrument(skip(state), fields(user = user.id))]
pub async fn status(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<IdQuery>,
) -> ApiResult<Json<StatusResponse>> {
    let status = state.manager.status(query.id()?, user.id)?;
    Ok(Json(StatusResponse { status }))
}

#[instrument(skip(state), fields(user = user.id))]
pub async fn log(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<IdQuery>,
) -> ApiResult<Json<LogResponse>> {
    let output = state.manager.log(query.id()?, user.id)?;
    Ok(Json(LogResponse {
        log: String::from_utf8_lossy(&output.bytes).into_owned(),
        truncated: output.truncated,
    }))
}

#[instrument(skip(state), fields(user = user.id))]
pub async fn purge(State(state): State<AppState>, user: CurrentUser) -> Json<PurgeResponse> {
    let purged = state.manager.purge(user.id);
    Json(PurgeResponse { purged })
}
