//! HTTP API handlers
//!
//! Every application outcome, including a pipeline that failed to start, is
//! answered with `200 OK` and a descriptive body. Driver calls run on the
//! blocking pool.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::protocol::{ControlResponse, StatusResponse, MSG_START_FAILED, MSG_STOP_FAILED};
use crate::server::controller::StreamPhase;
use crate::server::AppState;

/// Start the stream
pub async fn start_stream(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    tracing::info!("Start requested");
    let controller = state.controller.clone();

    let response = match tokio::task::spawn_blocking(move || controller.start()).await {
        Ok(Ok(outcome)) => ControlResponse::ok(outcome.message()),
        Ok(Err(e)) => ControlResponse::failed(MSG_START_FAILED, e.to_string()),
        Err(e) => {
            tracing::error!("Start task failed: {}", e);
            ControlResponse::failed(MSG_START_FAILED, e.to_string())
        }
    };

    Json(response)
}

/// Stop the stream
pub async fn stop_stream(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    tracing::info!("Stop requested");
    let controller = state.controller.clone();

    let response = match tokio::task::spawn_blocking(move || controller.stop()).await {
        Ok(outcome) => ControlResponse::ok(outcome.message()),
        Err(e) => {
            tracing::error!("Stop task failed: {}", e);
            ControlResponse::failed(MSG_STOP_FAILED, e.to_string())
        }
    };

    Json(response)
}

/// Get stream status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        streaming: state.controller.status() == StreamPhase::Running,
    })
}

/// Liveness check
pub async fn health() -> &'static str {
    "OK"
}
