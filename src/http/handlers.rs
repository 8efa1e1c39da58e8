use super::state::AppState;
use crate::analysis::SessionSummary;
use crate::session::{ControlError, SessionStats, TranscriptEntry};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::audio::{AcquireError, TabInfo};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartCaptureResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopCaptureResponse {
    pub status: String,
    pub stats: SessionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct TabReport {
    pub id: u32,
    pub title: String,
}

fn error_status(e: &ControlError) -> StatusCode {
    match e {
        ControlError::Acquire(AcquireError::PermissionDenied(_))
        | ControlError::Acquire(AcquireError::CaptureDenied(_)) => StatusCode::FORBIDDEN,
        ControlError::Acquire(AcquireError::NoActiveTab) => StatusCode::NOT_FOUND,
        ControlError::Acquire(AcquireError::DeviceUnavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ControlError::Backend(_) => StatusCode::BAD_GATEWAY,
        ControlError::StopWhileRequesting => StatusCode::CONFLICT,
        ControlError::InvalidConfig(_) | ControlError::Setup(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /capture/start
/// Start the capture pipeline (no-op when already capturing)
pub async fn start_capture(State(state): State<AppState>) -> impl IntoResponse {
    info!("Capture start requested");

    match state.controller.start().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StartCaptureResponse {
                status: "recording".to_string(),
                message: "Capture started".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start capture: {}", e);
            (
                error_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /capture/stop
/// Stop the capture pipeline, flushing the final chunk
pub async fn stop_capture(State(state): State<AppState>) -> impl IntoResponse {
    info!("Capture stop requested");

    match state.controller.stop().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StopCaptureResponse {
                status: "stopped".to_string(),
                stats,
                summary: state.controller.last_summary(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop capture: {}", e);
            (
                error_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /capture/status
/// Current capture statistics
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.controller.stats().await;
    (StatusCode::OK, Json(stats)).into_response()
}

/// GET /capture/transcript
/// Transcription log accumulated so far
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<TranscriptEntry> = state.controller.transcript().await;
    (StatusCode::OK, Json(transcript)).into_response()
}

/// POST /tabs
/// Report an open (or updated) browser tab
pub async fn report_tab(
    State(state): State<AppState>,
    Json(report): Json<TabReport>,
) -> impl IntoResponse {
    debug!("Tab reported: {} ({})", report.id, report.title);
    state.tabs.upsert(TabInfo {
        id: report.id,
        title: report.title,
    });
    StatusCode::NO_CONTENT
}

/// POST /tabs/{id}/activate
/// Mark a previously reported tab as active in the current window
pub async fn activate_tab(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    if state.tabs.set_active(id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown tab {}", id),
            }),
        )
            .into_response()
    }
}

/// DELETE /tabs/{id}
/// A tab was closed; clears the active selection if it pointed here
pub async fn remove_tab(State(state): State<AppState>, Path(id): Path<u32>) -> impl IntoResponse {
    state.tabs.remove(id);
    StatusCode::NO_CONTENT
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
