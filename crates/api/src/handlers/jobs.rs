//! Handlers for asynchronous prediction job status.

use axum::extract::{Path, State};
use axum::Json;
use reefwatch_core::error::CoreError;
use reefwatch_core::types::VideoId;

use crate::error::{AppError, AppResult};
use crate::jobs::Job;
use crate::state::AppState;

/// GET /jobs/{id}
pub async fn get_job(State(state): State<AppState>, Path(id): Path<VideoId>) -> AppResult<Json<Job>> {
    state.jobs.get(id).await.map(Json).ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        })
    })
}
