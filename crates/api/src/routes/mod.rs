pub mod health;
pub mod jobs;
pub mod predict;
pub mod results;

use axum::Router;

use crate::state::AppState;

/// Build the API route tree.
///
/// Route hierarchy:
///
/// ```text
/// /predict/video                 upload a video (multipart)
/// /predict/images                upload still images (multipart)
///
/// /results                       list processed results
/// /results/{filename}            fetch a manifest, segment, video or record
///
/// /jobs/{id}                     asynchronous prediction status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/predict", predict::router())
        .nest("/results", results::router())
        .nest("/jobs", jobs::router())
}
