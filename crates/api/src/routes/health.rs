use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Root status payload.
#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Names of the loaded detection models.
    pub models: Vec<String>,
    /// Whether ffmpeg and ffprobe can be executed.
    pub ffmpeg: bool,
}

/// GET / -- liveness message.
async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Reefwatch API is running.",
    })
}

/// GET /health -- returns service, model and ffmpeg health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ffmpeg = state.service.tools().verify().await.is_ok();
    let models: Vec<String> = state
        .service
        .registry()
        .models()
        .into_iter()
        .map(|m| m.name)
        .collect();

    let status = if ffmpeg && !models.is_empty() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        models,
        ffmpeg,
    })
}

/// Mount root-level status routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}
