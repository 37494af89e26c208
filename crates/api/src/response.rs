//! Shared response envelope types for API handlers.
//!
//! List responses use a `{ "data": ... }` envelope. Use [`DataResponse`]
//! instead of ad-hoc `serde_json::json!({ "data": ... })`.

use reefwatch_core::naming;
use reefwatch_core::records::ResultRecord;
use reefwatch_core::types::VideoId;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// # Example
///
/// ```ignore
/// Ok(Json(DataResponse { data: summaries }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Body of a successful `POST /predict/video`.
#[derive(Debug, Clone, Serialize)]
pub struct VideoPredictionResponse {
    pub id: VideoId,
    /// Relative URL of the HLS manifest.
    pub hls_url: String,
    /// Relative URL of the annotated MP4.
    pub video_url: String,
    /// Relative URL of the JSON result record.
    pub result_url: String,
    pub detected_species: Vec<String>,
    pub confidence_scores: Vec<f32>,
    pub frames_processed: u64,
    pub skipped_frames: Vec<u64>,
}

impl From<&ResultRecord> for VideoPredictionResponse {
    fn from(record: &ResultRecord) -> Self {
        Self {
            id: record.id,
            hls_url: naming::result_url(&record.video.manifest_filename),
            video_url: naming::result_url(&record.video.video_filename),
            result_url: naming::result_url(&naming::record_filename(&record.id)),
            detected_species: record.detections.detected_species.iter().cloned().collect(),
            confidence_scores: record.detections.confidence_scores.clone(),
            frames_processed: record.detections.frames_processed,
            skipped_frames: record.detections.skipped_frames.clone(),
        }
    }
}
