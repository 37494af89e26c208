//! Route definitions for result files.
//!
//! Mounted at `/results`.
//!
//! ```text
//! GET  /               list_results
//! GET  /{filename}     get_result_file
//! ```

use axum::routing::get;
use axum::Router;

use crate::handlers::results;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(results::list_results))
        .route("/{filename}", get(results::get_result_file))
}
