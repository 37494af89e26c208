use axum::routing::get;
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Mounted at `/jobs`.
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(jobs::get_job))
}
