//! Upload and result records.
//!
//! Results are persisted as one JSON record per processed upload in the
//! results directory. Listing reads these records instead of guessing state
//! from whatever media files happen to be on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detection::DetectionResult;
use crate::naming;
use crate::types::{Timestamp, VideoId};

/// A video persisted by the upload receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedVideo {
    pub id: VideoId,
    /// Sanitized client filename, for display only.
    pub original_filename: String,
    pub stored_filename: String,
    pub storage_path: PathBuf,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Annotated, packaged output of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedVideo {
    pub id: VideoId,
    pub video_filename: String,
    pub manifest_filename: String,
    pub segment_filenames: Vec<String>,
    pub duration_secs: f64,
}

/// Everything known about a finished result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: VideoId,
    pub created_at: Timestamp,
    pub original_filename: String,
    pub video: ProcessedVideo,
    pub detections: DetectionResult,
}

/// Listing entry for `GET /results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub id: VideoId,
    pub created_at: Timestamp,
    pub original_filename: String,
    pub manifest_filename: String,
    pub video_filename: String,
    pub hls_url: String,
    pub detected_species: Vec<String>,
    pub detection_count: usize,
}

impl From<&ResultRecord> for ResultSummary {
    fn from(record: &ResultRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            original_filename: record.original_filename.clone(),
            manifest_filename: record.video.manifest_filename.clone(),
            video_filename: record.video.video_filename.clone(),
            hls_url: naming::result_url(&record.video.manifest_filename),
            detected_species: record.detections.detected_species.iter().cloned().collect(),
            detection_count: record.detections.detection_count(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record {path}: {source}")]
    Malformed {
        path: String,
        source: serde_json::Error,
    },
}

/// Write a record atomically (temp file then rename).
pub async fn save_record(results_dir: &Path, record: &ResultRecord) -> Result<PathBuf, RecordError> {
    let path = results_dir.join(naming::record_filename(&record.id));
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(record).map_err(|source| RecordError::Malformed {
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}

pub async fn load_record(path: &Path) -> Result<ResultRecord, RecordError> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|source| RecordError::Malformed {
        path: path.to_string_lossy().to_string(),
        source,
    })
}

/// Load every result record, oldest first (ties broken by id).
///
/// Malformed records are logged and skipped so one bad file does not hide
/// the rest.
pub async fn list_records(results_dir: &Path) -> Result<Vec<ResultRecord>, RecordError> {
    let mut entries = match tokio::fs::read_dir(results_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !is_record_filename(&name) {
            continue;
        }
        match load_record(&entry.path()).await {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(file = %name, error = %e, "Skipping unreadable result record"),
        }
    }

    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(records)
}

fn is_record_filename(name: &str) -> bool {
    name.starts_with(naming::RESULT_PREFIX)
        && name
            .strip_suffix(naming::RECORD_EXTENSION)
            .is_some_and(|stem| stem.ends_with('.'))
}
