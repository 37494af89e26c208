use std::sync::Arc;

use reefwatch_pipeline::processor::DetectionService;

use crate::config::ServerConfig;
use crate::jobs::JobRegistry;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Loaded models, overlay and ffmpeg tools, initialized once at startup.
    pub service: Arc<DetectionService>,
    /// Asynchronous prediction jobs.
    pub jobs: Arc<JobRegistry>,
}
