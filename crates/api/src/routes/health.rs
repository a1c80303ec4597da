//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use super::sagas::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub dispatcher: &'static str,
}

/// GET /health: reports whether the dispatcher still accepts messages.
pub async fn check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    if state.dispatcher.is_closed() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                dispatcher: "closed",
            }),
        )
    } else {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                dispatcher: "running",
            }),
        )
    }
}
