use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use codeclash_core::session::Phase;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    /// Absent when the session actor has stopped.
    pub session: Option<SessionInfo>,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
    pub registered: usize,
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub phase: Phase,
    pub question: Option<usize>,
    pub players: usize,
}

/// Structured health check endpoint. Returns server status, connection counts,
/// and the session's phase as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ws = state.ws_connection_count.load(Ordering::Relaxed);
    let snapshot = state.session.snapshot().await;

    Json(HealthResponse {
        status: if snapshot.is_some() {
            "healthy"
        } else {
            "degraded"
        },
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo {
            websocket: ws,
            registered: snapshot.as_ref().map_or(0, |s| s.connections),
        },
        session: snapshot.map(|s| SessionInfo {
            phase: s.phase,
            question: s.question,
            players: s.players.len(),
        }),
    })
}

/// Readiness check: the session actor answers.
pub async fn readiness_check(State(state): State<AppState>) -> &'static str {
    if state.session.snapshot().await.is_none() {
        return "not ready: session stopped";
    }
    "ready"
}
