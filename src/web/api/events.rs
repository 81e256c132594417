//! Event ingestion endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::core::ingest::{Admission, InboundEvent};
use crate::error::Error;

use super::AppState;

/// Ingestion response.
#[derive(Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    fn error(message: String) -> Json<Self> {
        Json(Self {
            status: "error",
            id: None,
            error: Some(message),
        })
    }
}

/// Queue one inbound message.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(inbound): Json<InboundEvent>,
) -> (StatusCode, Json<IngestResponse>) {
    let ingestor = state.ingestor.clone();
    let result = tokio::task::spawn_blocking(move || ingestor.submit(inbound)).await;

    match result {
        Ok(Ok(Admission::Queued(id))) => (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                status: "queued",
                id: Some(id.to_string()),
                error: None,
            }),
        ),
        Ok(Ok(Admission::Echo)) => (
            StatusCode::OK,
            Json(IngestResponse {
                status: "ignored",
                id: None,
                error: None,
            }),
        ),
        Ok(Err(Error::InvalidEvent(msg))) => {
            (StatusCode::BAD_REQUEST, IngestResponse::error(msg))
        }
        Ok(Err(e @ Error::Store(_))) => {
            tracing::error!("Failed to enqueue event: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, IngestResponse::error(e.to_string()))
        }
        Ok(Err(e)) => {
            tracing::error!("Failed to enqueue event: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, IngestResponse::error(e.to_string()))
        }
        Err(e) => {
            tracing::error!("Ingestion task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, IngestResponse::error(e.to_string()))
        }
    }
}
