use std::path::PathBuf;
use std::str::FromStr;

use reefwatch_core::ffmpeg::FfmpegTools;
use reefwatch_pipeline::config::PipelineConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In production,
/// override via environment variables (a `.env` file is loaded first).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Synchronous video prediction holds
    /// the request open for the whole pipeline, so this is generous.
    pub request_timeout_secs: u64,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    pub models_dir: PathBuf,
    /// Directory holding the browser player, served at `/player`.
    pub web_dir: PathBuf,
    /// TTF/OTF font used for overlay labels.
    pub label_font_path: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Target HLS segment length in seconds.
    pub segment_secs: u32,
    /// Default per-model confidence threshold when a model has no sidecar
    /// override.
    pub confidence_threshold: f32,
    pub frame_stride: u32,
    pub pipeline_concurrency: usize,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                      |
    /// |------------------------|------------------------------|
    /// | `HOST`                 | `0.0.0.0`                    |
    /// | `PORT`                 | `8000`                       |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`      |
    /// | `REQUEST_TIMEOUT_SECS` | `900`                        |
    /// | `APP_ROOT`             | current directory            |
    /// | `UPLOAD_DIR`           | `$APP_ROOT/uploads`          |
    /// | `RESULTS_DIR`          | `$APP_ROOT/results`          |
    /// | `MODELS_DIR`           | `$APP_ROOT/models`           |
    /// | `WEB_DIR`              | `$APP_ROOT/web`              |
    /// | `LABEL_FONT_PATH`      | `$MODELS_DIR/label_font.ttf` |
    /// | `FFMPEG_BIN`           | `ffmpeg`                     |
    /// | `FFPROBE_BIN`          | `ffprobe`                    |
    /// | `HLS_SEGMENT_SECS`     | `4`                          |
    /// | `CONFIDENCE_THRESHOLD` | `0.5`                        |
    /// | `FRAME_STRIDE`         | `1`                          |
    /// | `PIPELINE_CONCURRENCY` | `2`                          |
    /// | `MAX_UPLOAD_BYTES`     | `1073741824`                 |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", "8000");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", "900");

        let app_root = std::env::var("APP_ROOT").map(PathBuf::from).unwrap_or_else(|_| {
            std::env::current_dir().expect("Current directory must be accessible")
        });
        let upload_dir = path_var("UPLOAD_DIR", || app_root.join("uploads"));
        let results_dir = path_var("RESULTS_DIR", || app_root.join("results"));
        let models_dir = path_var("MODELS_DIR", || app_root.join("models"));
        let web_dir = path_var("WEB_DIR", || app_root.join("web"));
        let label_font_path = path_var("LABEL_FONT_PATH", || models_dir.join("label_font.ttf"));
        let ffmpeg_bin = path_var("FFMPEG_BIN", || PathBuf::from("ffmpeg"));
        let ffprobe_bin = path_var("FFPROBE_BIN", || PathBuf::from("ffprobe"));

        let segment_secs: u32 = parse_var("HLS_SEGMENT_SECS", "4");
        assert!(segment_secs > 0, "HLS_SEGMENT_SECS must be positive");

        let confidence_threshold: f32 = parse_var("CONFIDENCE_THRESHOLD", "0.5");
        assert!(
            (0.0..=1.0).contains(&confidence_threshold),
            "CONFIDENCE_THRESHOLD must be within [0, 1]"
        );

        let frame_stride: u32 = parse_var("FRAME_STRIDE", "1");
        assert!(frame_stride > 0, "FRAME_STRIDE must be positive");

        let pipeline_concurrency: usize = parse_var("PIPELINE_CONCURRENCY", "2");
        assert!(pipeline_concurrency > 0, "PIPELINE_CONCURRENCY must be positive");

        let max_upload_bytes: usize = parse_var("MAX_UPLOAD_BYTES", "1073741824");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            upload_dir,
            results_dir,
            models_dir,
            web_dir,
            label_font_path,
            ffmpeg_bin,
            ffprobe_bin,
            segment_secs,
            confidence_threshold,
            frame_stride,
            pipeline_concurrency,
            max_upload_bytes,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            results_dir: self.results_dir.clone(),
            segment_secs: self.segment_secs,
            frame_stride: self.frame_stride,
            concurrency: self.pipeline_concurrency,
        }
    }

    pub fn ffmpeg_tools(&self) -> FfmpegTools {
        FfmpegTools {
            ffmpeg: self.ffmpeg_bin.clone(),
            ffprobe: self.ffprobe_bin.clone(),
        }
    }
}

fn parse_var<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid {}: {e}", std::any::type_name::<T>()))
}

fn path_var(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default)
}
