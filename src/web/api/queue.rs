//! Queue inspection endpoint.

use axum::{extract::State, http::StatusCode, Json};

use crate::store::QueueStats;

use super::AppState;

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, StatusCode> {
    let store = state.ingestor.store().clone();
    let stats = tokio::task::spawn_blocking(move || store.stats())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!("Failed to read queue stats: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok(Json(stats))
}
