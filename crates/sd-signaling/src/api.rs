use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tokio::sync::watch;
use tracing::warn;

use crate::config::ServerConfig;
use crate::hub::HubHandle;
use crate::metrics::SignalingMetrics;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub metrics: Arc<SignalingMetrics>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
    pub shutdown: watch::Receiver<bool>,
}

// GET /health
pub async fn get_health(State(state): State<AppState>) -> Response {
    let Some(status) = state.hub.status().await else {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" }))).into_response();
    };

    let response = json!({
        "status": "ok",
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "connectedHosts": status.connected_hosts,
        "activeSessions": status.active_sessions,
        "pendingSessions": status.pending_sessions,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (StatusCode::OK, Json(response)).into_response()
}

// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export_prometheus() {
        Ok(text) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to export metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
