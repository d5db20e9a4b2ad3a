//! Sync API endpoints
//!
//! Read-only view of the checkpoint store and scheduler progress.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::{select_canonical, Checkpoint, CheckpointSummary, StatusSnapshot};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/checkpoints", get(list_checkpoints))
        .route("/checkpoints/:source_id", get(get_checkpoint))
        .route("/canonical", get(get_canonical))
}

/// Scheduler progress plus the configured sources
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sources: Vec<String>,
    #[serde(rename = "intervalMs")]
    pub interval_ms: u64,
    #[serde(flatten)]
    pub scheduler: StatusSnapshot,
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let sync = &state.config().sync;

    Json(StatusResponse {
        sources: sync.sources.iter().map(|s| s.id.clone()).collect(),
        interval_ms: sync.interval.as_millis() as u64,
        scheduler: state.scheduler().snapshot().await,
    })
}

async fn list_checkpoints(State(state): State<AppState>) -> Result<Json<Vec<CheckpointSummary>>> {
    let checkpoints = state.store().list_checkpoints().await?;
    Ok(Json(checkpoints.iter().map(Checkpoint::summary).collect()))
}

async fn get_checkpoint(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Result<Json<Checkpoint>> {
    Ok(Json(state.store().read_checkpoint(&source_id).await?))
}

/// The checkpoint the next broadcast would push
async fn get_canonical(State(state): State<AppState>) -> Result<Json<Checkpoint>> {
    let checkpoints = state.store().list_checkpoints().await?;
    match select_canonical(&checkpoints) {
        Some(canonical) => Ok(Json(canonical.clone())),
        None => Err(AppError::NotFound("no checkpoint recorded yet".to_string())),
    }
}
