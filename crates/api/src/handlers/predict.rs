//! Handlers for video and image prediction uploads.
//!
//! Uploads are validated on the multipart part headers before any bytes are
//! read, so a rejected upload never reaches disk or the detector.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reefwatch_core::error::CoreError;
use reefwatch_core::media;
use reefwatch_core::naming;
use reefwatch_core::records::UploadedVideo;
use reefwatch_core::types::{new_video_id, VideoId};
use reefwatch_pipeline::images::{ImageBatch, UploadedImage};
use reefwatch_pipeline::processor::ProcessOptions;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, AppResult};
use crate::jobs::JobStatus;
use crate::response::VideoPredictionResponse;
use crate::state::AppState;

/// Multipart field names accepted for the video part.
const VIDEO_FIELDS: &[&str] = &["video", "file"];
const IMAGE_FIELD: &str = "images";
const THRESHOLD_FIELD: &str = "confs_threshold";

#[derive(Debug, Deserialize)]
pub struct PredictVideoParams {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Return `202` immediately and process in the background.
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

/// `202` body for an asynchronous video prediction.
#[derive(Debug, Serialize)]
pub struct QueuedJobResponse {
    pub job_id: VideoId,
    pub status: &'static str,
    pub status_url: String,
    /// Where the manifest will be served once the job is done.
    pub hls_url: String,
}

/// POST /predict/video
///
/// Multipart with a `video` part (or `file`) and optional repeated
/// `confs_threshold` parts. Synchronous by default; `?async=true` queues a
/// job instead.
pub async fn predict_video(
    State(state): State<AppState>,
    Query(params): Query<PredictVideoParams>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    if params.max_frames == Some(0) {
        return Err(CoreError::Validation("max_frames must be at least 1".into()).into());
    }

    let mut upload: Option<UploadedVideo> = None;
    let mut thresholds = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await?
    {
        let name = field.name().unwrap_or("").to_string();
        if VIDEO_FIELDS.contains(&name.as_str()) {
            if upload.is_some() {
                return Err(AppError::BadRequest("Only one video may be uploaded per request".into()));
            }
            upload = Some(store_video(field, &state.config.upload_dir).await?);
        } else if name == THRESHOLD_FIELD {
            thresholds.push(parse_threshold(field).await?);
        }
    }

    let upload = upload.ok_or_else(|| AppError::BadRequest("Missing required 'video' field".into()))?;
    check_threshold_count(&state, &thresholds)?;

    let options = ProcessOptions {
        max_frames: params.max_frames,
        thresholds,
    };

    if params.run_async {
        return Ok(queue_video(state, upload, options).await.into_response());
    }

    // Detached so that a client disconnect cannot cancel the pipeline
    // halfway through writing results.
    let service = Arc::clone(&state.service);
    let record = tokio::spawn(async move {
        let slot = service.reserve().await?;
        service.process_video(&slot, &upload, options).await
    })
    .await
    .map_err(|e| AppError::InternalError(format!("pipeline task failed: {e}")))??;

    Ok(Json(VideoPredictionResponse::from(&record)).into_response())
}

async fn queue_video(
    state: AppState,
    upload: UploadedVideo,
    options: ProcessOptions,
) -> (StatusCode, Json<QueuedJobResponse>) {
    let id = upload.id;
    state.jobs.create(id).await;

    let service = Arc::clone(&state.service);
    let jobs = Arc::clone(&state.jobs);
    tokio::spawn(async move {
        let outcome = match service.reserve().await {
            Ok(slot) => {
                jobs.update(id, JobStatus::Processing).await;
                service.process_video(&slot, &upload, options).await
            }
            Err(e) => Err(e),
        };
        let status = match outcome {
            Ok(record) => JobStatus::Done {
                result: VideoPredictionResponse::from(&record),
            },
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Background prediction failed");
                JobStatus::Failed {
                    message: e.public_message(),
                }
            }
        };
        jobs.update(id, status).await;
    });

    tracing::info!(job_id = %id, "Queued video prediction");
    (
        StatusCode::ACCEPTED,
        Json(QueuedJobResponse {
            job_id: id,
            status: "queued",
            status_url: format!("/jobs/{id}"),
            hls_url: naming::result_url(&naming::manifest_filename(&id)),
        }),
    )
}

/// POST /predict/images
///
/// Multipart with one or more `images` parts and optional repeated
/// `confs_threshold` parts (one per model, in model order).
pub async fn predict_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<ImageBatch>> {
    let mut images = Vec::new();
    let mut thresholds = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            IMAGE_FIELD => {
                let filename = field.file_name().unwrap_or("image").to_string();
                media::validate_image_upload(field.content_type(), &filename)?;
                let bytes = field.bytes().await?;
                images.push(UploadedImage {
                    original_filename: media::sanitize_filename(&filename),
                    bytes: bytes.to_vec(),
                });
            }
            THRESHOLD_FIELD => thresholds.push(parse_threshold(field).await?),
            _ => {} // ignore unknown fields
        }
    }

    if images.is_empty() {
        return Err(AppError::BadRequest("Missing required 'images' field".into()));
    }
    check_threshold_count(&state, &thresholds)?;

    let slot = state.service.reserve().await?;
    let batch = state.service.process_images(&slot, images, thresholds).await?;
    Ok(Json(batch))
}

/// Validate the part headers, then stream the video to `upload_dir` chunk
/// by chunk.
async fn store_video(mut field: Field<'_>, upload_dir: &FsPath) -> AppResult<UploadedVideo> {
    let original = field.file_name().map(str::to_string);
    let content_type = media::validate_video_upload(field.content_type(), original.as_deref())?;

    let id = new_video_id();
    let stored_filename = format!("{id}{}", media::storage_extension(&content_type, original.as_deref()));
    let storage_path = upload_dir.join(&stored_filename);

    let mut file = tokio::fs::File::create(&storage_path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let mut size_bytes: u64 = 0;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                discard(&storage_path).await;
                return Err(e.into());
            }
        };
        size_bytes += chunk.len() as u64;
        if let Err(e) = file.write_all(&chunk).await {
            discard(&storage_path).await;
            return Err(AppError::InternalError(e.to_string()));
        }
    }
    file.flush()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    if size_bytes == 0 {
        discard(&storage_path).await;
        return Err(CoreError::Validation("Uploaded video is empty".into()).into());
    }

    let original_filename = media::sanitize_filename(original.as_deref().unwrap_or(&stored_filename));
    tracing::info!(
        video_id = %id,
        file = %original_filename,
        content_type = %content_type,
        size_bytes,
        "Stored video upload"
    );

    Ok(UploadedVideo {
        id,
        original_filename,
        stored_filename,
        storage_path,
        content_type,
        size_bytes,
    })
}

async fn discard(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
    }
}

async fn parse_threshold(field: Field<'_>) -> AppResult<f32> {
    let text = field.text().await?;
    let value: f32 = text
        .trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("Invalid confidence threshold '{}'", text.trim())))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(CoreError::Validation(format!("Confidence threshold {value} is outside [0, 1]")).into());
    }
    Ok(value)
}

fn check_threshold_count(state: &AppState, thresholds: &[f32]) -> AppResult<()> {
    let models = state.service.registry().len();
    if thresholds.len() > models {
        return Err(CoreError::Validation(format!(
            "Got {} confidence thresholds for {models} models",
            thresholds.len()
        ))
        .into());
    }
    Ok(())
}
