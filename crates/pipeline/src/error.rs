use reefwatch_core::ffmpeg::FfmpegError;
use reefwatch_core::hls::{PlaylistError, PlaylistLoadError};
use reefwatch_core::records::RecordError;

/// Failure inside a single detector invocation.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to load model {path}: {message}")]
    Load { path: String, message: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<i64>),

    #[error("detector lock poisoned")]
    Poisoned,
}

/// Startup-time configuration problems. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no .onnx models found in {0}")]
    NoModels(String),

    #[error("models directory unreadable ({path}): {source}")]
    ModelsDir {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid model sidecar {path}: {message}")]
    Sidecar { path: String, message: String },

    #[error("label font unavailable ({path}): {message}")]
    Font { path: String, message: String },

    #[error(transparent)]
    Detector(#[from] DetectorError),
}

/// Failure while processing one upload.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unreadable video: {0}")]
    UnreadableVideo(String),

    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("frame pipe failed: {0}")]
    FramePipe(String),

    #[error("packaging produced an invalid playlist: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("packaging failed: {0}")]
    PlaylistLoad(#[from] PlaylistLoadError),

    #[error("failed to write result record: {0}")]
    Record(#[from] RecordError),

    #[error(transparent)]
    Detection(#[from] DetectorError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Join(String),
}

impl PipelineError {
    /// Short message safe to return to clients.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::UnreadableVideo(_) => {
                "The uploaded video could not be read".to_string()
            }
            PipelineError::Image(_) => "The uploaded image could not be decoded".to_string(),
            PipelineError::Detection(_) => "Species detection failed".to_string(),
            PipelineError::Playlist(_) | PipelineError::PlaylistLoad(_) => {
                "Streaming packaging failed".to_string()
            }
            _ => "Video processing failed".to_string(),
        }
    }
}
