//! Route definitions for prediction uploads.
//!
//! Mounted at `/predict`.
//!
//! ```text
//! POST /video     predict_video   (multipart)
//! POST /images    predict_images  (multipart)
//! ```

use axum::routing::post;
use axum::Router;

use crate::handlers::predict;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/video", post(predict::predict_video))
        .route("/images", post(predict::predict_images))
}
