#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use image::RgbImage;
use reefwatch_core::detection::{BoundingBox, Detection, DetectionResultBuilder};
use reefwatch_core::ffmpeg::FfmpegTools;
use reefwatch_core::naming;
use reefwatch_core::records::{self, ProcessedVideo, ResultRecord};
use reefwatch_core::types::VideoId;
use reefwatch_pipeline::detector::Detector;
use reefwatch_pipeline::error::DetectorError;
use reefwatch_pipeline::overlay::Overlay;
use reefwatch_pipeline::processor::DetectionService;
use reefwatch_pipeline::registry::ModelRegistry;
use tempfile::TempDir;
use tower::ServiceExt;

use reefwatch_api::config::ServerConfig;
use reefwatch_api::jobs::JobRegistry;
use reefwatch_api::router::build_app_router;
use reefwatch_api::state::AppState;

pub const BOUNDARY: &str = "reefwatch-test-boundary";

/// Detector that reports one `fish` per call and counts its invocations.
pub struct CountingDetector {
    pub calls: Arc<AtomicUsize>,
}

impl Detector for CountingDetector {
    fn name(&self) -> &str {
        "counting"
    }

    fn detect(&mut self, frame: &RgbImage, min_confidence: f32) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if 0.9 < min_confidence {
            return Ok(vec![]);
        }
        Ok(vec![Detection {
            model: "counting".into(),
            class_id: 0,
            label: "fish".into(),
            confidence: 0.9,
            bbox: BoundingBox {
                x1: 2.0,
                y1: 2.0,
                x2: (frame.width() / 2) as f32,
                y2: (frame.height() / 2) as f32,
            },
        }])
    }
}

/// A fully wired application backed by a temporary directory.
pub struct TestApp {
    pub app: Router,
    pub calls: Arc<AtomicUsize>,
    pub config: ServerConfig,
    _root: TempDir,
}

impl TestApp {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn detector_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn results_dir(&self) -> &Path {
        &self.config.results_dir
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.upload_dir
    }
}

/// Build a test `ServerConfig` rooted at `root`, with safe defaults.
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        upload_dir: root.join("uploads"),
        results_dir: root.join("results"),
        models_dir: root.join("models"),
        web_dir: root.join("web"),
        label_font_path: root.join("models/label_font.ttf"),
        ffmpeg_bin: PathBuf::from("ffmpeg"),
        ffprobe_bin: PathBuf::from("ffprobe"),
        segment_secs: 4,
        confidence_threshold: 0.5,
        frame_stride: 1,
        pipeline_concurrency: 2,
        max_upload_bytes: 16 * 1024 * 1024,
    }
}

/// Build the full application router with all middleware layers.
///
/// Uses the same [`build_app_router`] as `main.rs`, with a counting fake
/// detector in place of ONNX models and a text-less overlay.
pub fn build_test_app() -> TestApp {
    build_test_app_with(|_| {})
}

/// Like [`build_test_app`], with `adjust` applied to the config first.
pub fn build_test_app_with(adjust: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    adjust(&mut config);
    for dir in [&config.upload_dir, &config.results_dir, &config.web_dir] {
        std::fs::create_dir_all(dir).unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ModelRegistry::from_detectors(vec![(
        Box::new(CountingDetector {
            calls: Arc::clone(&calls),
        }) as Box<dyn Detector>,
        config.confidence_threshold,
    )]);
    let tools = FfmpegTools {
        ffmpeg: config.ffmpeg_bin.clone(),
        ffprobe: config.ffprobe_bin.clone(),
    };
    let service = DetectionService::new(config.pipeline_config(), tools, registry, Overlay::boxes_only());

    let state = AppState {
        config: Arc::new(config.clone()),
        service: Arc::new(service),
        jobs: Arc::new(JobRegistry::new()),
    };

    TestApp {
        app: build_app_router(state, &config),
        calls,
        config,
        _root: root,
    }
}

/// Send a GET request.
pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a GET request with one extra header.
pub async fn get_with_header(app: Router, uri: &str, name: &str, value: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// One part of a multipart form.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: Vec<u8>,
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, filename: &'a str, content_type: &'a str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            filename: Some(filename),
            content_type: Some(content_type),
            data: data.into(),
        }
    }

    pub fn text(name: &'a str, value: &str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

/// Encode `parts` as a `multipart/form-data` body using [`BOUNDARY`].
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(ct) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart form.
pub async fn post_multipart(app: Router, uri: &str, parts: &[Part<'_>]) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

/// Encode a small solid PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, image::Rgb([0, 80, 160]))
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Write a processed result to `results_dir` as the pipeline would: a
/// record, a manifest and one segment.
pub async fn seed_result(results_dir: &Path, id: VideoId, created_offset_secs: i64, species: &[&str]) -> ResultRecord {
    let segment = format!("{}_000.ts", naming::result_stem(&id));
    let manifest = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:4.000000,\n{segment}\n#EXT-X-ENDLIST\n"
    );
    std::fs::write(results_dir.join(naming::manifest_filename(&id)), manifest).unwrap();
    std::fs::write(results_dir.join(&segment), vec![0x47u8; 188 * 4]).unwrap();
    std::fs::write(results_dir.join(naming::video_filename(&id)), b"fake mp4").unwrap();

    let mut builder = DetectionResultBuilder::new(id);
    let detections = species
        .iter()
        .map(|label| Detection {
            model: "counting".into(),
            class_id: 0,
            label: label.to_string(),
            confidence: 0.8,
            bbox: BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
        })
        .collect();
    builder.record_analyzed(0, detections);
    builder.record_written();

    let record = ResultRecord {
        id,
        created_at: Utc.timestamp_opt(1_700_000_000 + created_offset_secs, 0).unwrap(),
        original_filename: "reef.mp4".into(),
        video: ProcessedVideo {
            id,
            video_filename: naming::video_filename(&id),
            manifest_filename: naming::manifest_filename(&id),
            segment_filenames: vec![segment],
            duration_secs: 4.0,
        },
        detections: builder.build(),
    };
    records::save_record(results_dir, &record).await.unwrap();
    record
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}
