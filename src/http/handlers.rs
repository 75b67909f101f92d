use super::state::AppState;
use crate::error::SessionError;
use crate::session::{SessionState, SessionStats, TranscriptLine};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// Start muted
    #[serde(default)]
    pub muted: bool,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub state: SessionState,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct MuteResponse {
    pub session_id: String,
    pub muted: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub state: SessionState,
    pub muted: bool,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub lines: Vec<TranscriptLine>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Session {} not found", session_id))
}

fn start_error_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::PermissionDenied => StatusCode::FORBIDDEN,
        SessionError::Transport(_) => StatusCode::BAD_GATEWAY,
        SessionError::Cancelled => StatusCode::CONFLICT,
        SessionError::Device(_) | SessionError::InvalidFrame(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/sessions
/// Start a new voice session (or restart an idle one with the same ID)
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("voice-{}", uuid::Uuid::new_v4()));

    info!("Starting voice session: {}", session_id);

    let (session, pending) = {
        let mut sessions = state.sessions.write().await;
        if let Some(existing) = sessions.get(&session_id) {
            if existing.state() != SessionState::Idle {
                return error_response(
                    StatusCode::CONFLICT,
                    format!("Session {} is already {}", session_id, existing.state()),
                );
            }
        }
        let session = Arc::new(state.new_session(session_id.clone()));
        session.set_muted(req.muted);
        // Connecting is published before the entry becomes visible
        let pending = session.launch().await;
        sessions.insert(session_id.clone(), Arc::clone(&session));
        (session, pending)
    };

    if let Err(e) = pending.wait().await {
        error!("Failed to start session {}: {}", session_id, e);
        // A stopped session stays listed; a failed one is dropped unless replaced
        if e != SessionError::Cancelled {
            let mut sessions = state.sessions.write().await;
            if sessions
                .get(&session_id)
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                sessions.remove(&session_id);
            }
        }
        return error_response(start_error_status(&e), format!("Failed to start session: {}", e));
    }

    info!("Voice session {} started", session_id);

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id: session_id.clone(),
            state: session.state(),
            message: format!("Session {} started", session_id),
        }),
    )
        .into_response()
}

/// POST /voice/sessions/:session_id/stop
/// Stop a session; stopping an idle session is not an error
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping voice session: {}", session_id);

    let session = state.sessions.read().await.get(&session_id).cloned();

    match session {
        Some(session) => match session.stop().await {
            Ok(stats) => (
                StatusCode::OK,
                Json(StopSessionResponse {
                    session_id,
                    state: session.state(),
                    stats,
                }),
            )
                .into_response(),
            Err(e) => {
                error!("Failed to stop session {}: {}", session_id, e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to stop session: {}", e),
                )
            }
        },
        None => {
            warn!("Session {} not found", session_id);
            not_found(&session_id)
        }
    }
}

/// POST /voice/sessions/:session_id/mute
/// Toggle the microphone mute flag
pub async fn toggle_mute(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => {
            let muted = session.toggle_mute();
            (StatusCode::OK, Json(MuteResponse { session_id, muted })).into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /voice/sessions/:session_id/status
/// Get state and statistics of a session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (
            StatusCode::OK,
            Json(StatusResponse {
                state: session.state(),
                muted: session.is_muted(),
                stats: session.stats(),
                session_id,
            }),
        )
            .into_response(),
        None => not_found(&session_id),
    }
}

/// GET /voice/sessions/:session_id/transcript
/// Get the most recent transcript lines
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (
            StatusCode::OK,
            Json(TranscriptResponse {
                lines: session.transcript(),
                session_id,
            }),
        )
            .into_response(),
        None => not_found(&session_id),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_error_status() {
        assert_eq!(start_error_status(&SessionError::PermissionDenied), StatusCode::FORBIDDEN);
        assert_eq!(
            start_error_status(&SessionError::Transport("refused".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            start_error_status(&SessionError::Device("no output".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(start_error_status(&SessionError::Cancelled), StatusCode::CONFLICT);
    }

    #[test]
    fn test_start_request_defaults() {
        let req: StartSessionRequest = serde_json::from_str("{}").unwrap();
        assert!(req.session_id.is_none());
        assert!(!req.muted);
    }
}
