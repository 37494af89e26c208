//! Video processing: decode → detect → overlay → encode → package.

use std::sync::Arc;

use reefwatch_core::detection::{Detection, DetectionResult, DetectionResultBuilder};
use reefwatch_core::ffmpeg::{self, FfmpegError, FfmpegTools, VideoInfo};
use reefwatch_core::naming;
use reefwatch_core::records::{self, ResultRecord, UploadedVideo};
use reefwatch_core::types::VideoId;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::frames::{FfmpegFrameReader, FfmpegFrameWriter, FrameSink, FrameSource};
use crate::images::{self, ImageBatch, UploadedImage};
use crate::overlay::Overlay;
use crate::packager;
use crate::registry::ModelRegistry;

/// Frame sampling policy for one run.
#[derive(Debug, Clone, Copy)]
pub struct FramePolicy {
    /// Run inference on every Nth frame; frames in between reuse the most
    /// recent detections. Values below 1 are treated as 1.
    pub stride: u32,
    /// Stop after this many output frames.
    pub max_frames: Option<u64>,
}

impl Default for FramePolicy {
    fn default() -> Self {
        Self {
            stride: 1,
            max_frames: None,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub max_frames: Option<u64>,
    /// Per-model confidence overrides, in registry order.
    pub thresholds: Vec<f32>,
}

/// Drive frames from `source` through detection and overlay into `sink`.
///
/// Every decoded frame is written exactly once, in order. A frame whose
/// inference fails is logged, recorded in `skipped_frames`, and written
/// without annotations.
pub fn annotate_stream(
    video_id: VideoId,
    source: &mut dyn FrameSource,
    mut sink: Box<dyn FrameSink>,
    registry: &ModelRegistry,
    overlay: &Overlay,
    policy: FramePolicy,
    thresholds: &[f32],
) -> Result<DetectionResult, PipelineError> {
    let stride = u64::from(policy.stride.max(1));
    let mut builder = DetectionResultBuilder::new(video_id);
    let mut current: Vec<Detection> = Vec::new();
    let mut frame_index: u64 = 0;

    loop {
        if policy.max_frames.is_some_and(|max| frame_index >= max) {
            tracing::info!(%video_id, frame_index, "Frame limit reached");
            break;
        }
        let Some(mut frame) = source.next_frame()? else {
            break;
        };

        if frame_index % stride == 0 {
            match registry.detect(&frame, thresholds) {
                Ok(detections) => {
                    current = detections;
                    builder.record_analyzed(frame_index, current.clone());
                }
                Err(e) => {
                    tracing::warn!(%video_id, frame_index, error = %e, "Inference failed; writing frame unannotated");
                    current.clear();
                    builder.record_skipped(frame_index);
                }
            }
        }

        overlay.draw(&mut frame, &current);
        sink.write_frame(&frame)?;
        builder.record_written();
        frame_index += 1;
    }

    if builder.frames_processed() == 0 {
        return Err(PipelineError::UnreadableVideo("no frames could be decoded".into()));
    }

    sink.finish()?;
    Ok(builder.build())
}

/// Duration the packaged stream must cover.
///
/// This is the probed source duration, unless `max_frames` cut the output
/// short or the container reports none, in which case it is the length of
/// the frames actually written.
pub fn expected_output_secs(info: &VideoInfo, frames_written: u64, max_frames: Option<u64>) -> f64 {
    let truncated = max_frames.is_some_and(|max| frames_written >= max);
    if truncated || info.duration_secs <= 0.0 {
        frames_written as f64 / info.fps
    } else {
        info.duration_secs
    }
}

/// A reserved pipeline slot. Processing requires one; holding it counts
/// against the configured concurrency.
pub struct PipelineSlot {
    _permit: OwnedSemaphorePermit,
}

/// The explicitly-initialized detection service shared by all requests.
pub struct DetectionService {
    config: PipelineConfig,
    tools: FfmpegTools,
    registry: Arc<ModelRegistry>,
    overlay: Arc<Overlay>,
    permits: Arc<Semaphore>,
}

impl DetectionService {
    pub fn new(
        config: PipelineConfig,
        tools: FfmpegTools,
        registry: ModelRegistry,
        overlay: Overlay,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            tools,
            registry: Arc::new(registry),
            overlay: Arc::new(overlay),
            permits,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tools(&self) -> &FfmpegTools {
        &self.tools
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn overlay(&self) -> &Arc<Overlay> {
        &self.overlay
    }

    /// Wait for a free pipeline slot.
    pub async fn reserve(&self) -> Result<PipelineSlot, PipelineError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))?;
        Ok(PipelineSlot { _permit: permit })
    }

    /// Run the full pipeline for one upload and persist its result record.
    pub async fn process_video(
        &self,
        _slot: &PipelineSlot,
        upload: &UploadedVideo,
        options: ProcessOptions,
    ) -> Result<ResultRecord, PipelineError> {
        let started = std::time::Instant::now();
        let id = upload.id;

        let info = ffmpeg::video_info(&self.tools, &upload.storage_path)
            .await
            .map_err(|e| match e {
                FfmpegError::NotFound(_) => PipelineError::Ffmpeg(e),
                other => PipelineError::UnreadableVideo(other.to_string()),
            })?;
        tracing::info!(
            video_id = %id,
            width = info.width,
            height = info.height,
            rotation = info.rotation,
            frame_rate = %info.frame_rate,
            total_frames = info.total_frames,
            duration_secs = info.duration_secs,
            "Processing video"
        );

        let policy = FramePolicy {
            stride: self.config.frame_stride,
            max_frames: options.max_frames,
        };
        let detections = self
            .annotate(id, upload, &info, policy, options.thresholds)
            .await?;

        let expected_secs = expected_output_secs(&info, detections.frames_processed, policy.max_frames);
        let video = packager::package(
            &self.tools,
            &self.config.results_dir,
            &id,
            self.config.segment_secs,
            expected_secs,
        )
        .await?;

        let record = ResultRecord {
            id,
            created_at: chrono::Utc::now(),
            original_filename: upload.original_filename.clone(),
            video,
            detections,
        };
        records::save_record(&self.config.results_dir, &record).await?;

        tracing::info!(
            video_id = %id,
            frames = record.detections.frames_processed,
            detections = record.detections.detection_count(),
            species = ?record.detections.detected_species,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Video processed"
        );
        Ok(record)
    }

    /// Annotate a batch of still images.
    pub async fn process_images(
        &self,
        _slot: &PipelineSlot,
        uploads: Vec<UploadedImage>,
        thresholds: Vec<f32>,
    ) -> Result<ImageBatch, PipelineError> {
        let batch_id = reefwatch_core::types::new_video_id();
        let registry = Arc::clone(&self.registry);
        let overlay = Arc::clone(&self.overlay);
        let results_dir = self.config.results_dir.clone();

        let batch = tokio::task::spawn_blocking(move || {
            images::predict_batch(batch_id, &uploads, &registry, &overlay, &thresholds, &results_dir)
        })
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))??;

        tracing::info!(%batch_id, images = batch.images.len(), "Image batch processed");
        Ok(batch)
    }

    async fn annotate(
        &self,
        id: VideoId,
        upload: &UploadedVideo,
        info: &VideoInfo,
        policy: FramePolicy,
        thresholds: Vec<f32>,
    ) -> Result<DetectionResult, PipelineError> {
        let tools = self.tools.clone();
        let input = upload.storage_path.clone();
        let output = self.config.results_dir.join(naming::video_filename(&id));
        let segment_secs = self.config.segment_secs;
        let info = info.clone();
        let registry = Arc::clone(&self.registry);
        let overlay = Arc::clone(&self.overlay);

        tokio::task::spawn_blocking(move || {
            let mut reader = FfmpegFrameReader::spawn(&tools, &input, &info)?;
            let writer = FfmpegFrameWriter::spawn(&tools, &output, &info, segment_secs)?;
            annotate_stream(
                id,
                &mut reader,
                Box::new(writer),
                &registry,
                &overlay,
                policy,
                &thresholds,
            )
        })
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use assert_matches::assert_matches;
    use image::Rgb;

    use super::*;
    use crate::detector::Detector;
    use crate::frames::memory::{VecSink, VecSource};
    use crate::overlay::label_color;
    use crate::registry::tests::ScriptedDetector;

    fn registry_of(detectors: Vec<ScriptedDetector>) -> ModelRegistry {
        ModelRegistry::from_detectors(
            detectors
                .into_iter()
                .map(|d| (Box::new(d) as Box<dyn Detector>, 0.5))
                .collect(),
        )
    }

    fn run(
        source: &mut VecSource,
        registry: &ModelRegistry,
        policy: FramePolicy,
    ) -> (Result<DetectionResult, PipelineError>, VecSink) {
        let sink = VecSink::default();
        let result = annotate_stream(
            uuid::Uuid::nil(),
            source,
            Box::new(sink.clone()),
            registry,
            &Overlay::boxes_only(),
            policy,
            &[],
        );
        (result, sink)
    }

    #[test]
    fn every_frame_is_written_in_order() {
        // Distinct frames so ordering is observable.
        let frames: Vec<_> = (0..5u8)
            .map(|i| image::RgbImage::from_pixel(32, 32, Rgb([0, 0, i])))
            .collect();
        let mut source = VecSource::new(frames);
        let registry = registry_of(vec![ScriptedDetector::new("m", "fish", 0.9)]);

        let (result, sink) = run(&mut source, &registry, FramePolicy::default());
        let result = result.unwrap();

        let written = sink.frames.lock().unwrap();
        assert_eq!(written.len(), 5);
        for (i, frame) in written.iter().enumerate() {
            // Bottom-right corner is outside the scripted box.
            assert_eq!(frame.get_pixel(31, 31).0[2], i as u8);
        }
        assert!(*sink.finished.lock().unwrap());
        assert_eq!(result.frames_processed, 5);
        assert_eq!(result.frames_analyzed, 5);
        assert_eq!(result.detected_species.len(), 1);
        assert!(result.detected_species.contains("fish"));
        assert!(result.confidence_scores.iter().all(|s| *s > 0.0 && *s <= 1.0));
    }

    #[test]
    fn stride_reuses_detections_without_dropping_frames() {
        let detector = ScriptedDetector::new("m", "fish", 0.9);
        let calls = Arc::clone(&detector.calls);
        let registry = registry_of(vec![detector]);
        let mut source = VecSource::solid(7, 32, 32);

        let (result, sink) = run(
            &mut source,
            &registry,
            FramePolicy {
                stride: 3,
                max_frames: None,
            },
        );
        let result = result.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3, "frames 0, 3 and 6");
        assert_eq!(result.frames_analyzed, 3);
        assert_eq!(result.frames_processed, 7);
        let written = sink.frames.lock().unwrap();
        assert_eq!(written.len(), 7);
        // Frame 1 was not analyzed but still carries frame 0's box.
        assert_eq!(*written[1].get_pixel(1, 8), label_color("fish"));
    }

    #[test]
    fn failing_frame_is_skipped_not_fatal() {
        let mut detector = ScriptedDetector::new("m", "fish", 0.9);
        detector.fail_on_call = Some(1);
        let registry = registry_of(vec![detector]);
        let mut source = VecSource::solid(3, 32, 32);

        let (result, sink) = run(&mut source, &registry, FramePolicy::default());
        let result = result.unwrap();

        assert_eq!(result.skipped_frames, vec![1]);
        assert_eq!(result.frames_processed, 3);
        assert_eq!(result.confidence_scores.len(), 2);
        let written = sink.frames.lock().unwrap();
        assert!(written[1].pixels().all(|p| *p == Rgb([0, 0, 0])), "skipped frame is unannotated");
    }

    #[test]
    fn max_frames_truncates_output() {
        let registry = registry_of(vec![ScriptedDetector::new("m", "fish", 0.9)]);
        let mut source = VecSource::solid(10, 16, 16);
        let (result, sink) = run(
            &mut source,
            &registry,
            FramePolicy {
                stride: 1,
                max_frames: Some(4),
            },
        );
        assert_eq!(result.unwrap().frames_processed, 4);
        assert_eq!(sink.frames.lock().unwrap().len(), 4);
    }

    #[test]
    fn below_threshold_detections_do_not_count_as_species() {
        let registry = registry_of(vec![
            ScriptedDetector::new("a", "fish", 0.9),
            ScriptedDetector::new("b", "jellyfish", 0.3),
        ]);
        let mut source = VecSource::solid(2, 16, 16);
        let (result, _) = run(&mut source, &registry, FramePolicy::default());
        let species: Vec<String> = result.unwrap().detected_species.into_iter().collect();
        assert_eq!(species, vec!["fish".to_string()]);
    }

    #[test]
    fn empty_stream_is_unreadable() {
        let registry = registry_of(vec![ScriptedDetector::new("m", "fish", 0.9)]);
        let mut source = VecSource::new(vec![]);
        let (result, sink) = run(&mut source, &registry, FramePolicy::default());
        assert_matches!(result, Err(PipelineError::UnreadableVideo(_)));
        assert!(!*sink.finished.lock().unwrap());
    }

    #[test]
    fn decode_error_aborts() {
        let registry = registry_of(vec![ScriptedDetector::new("m", "fish", 0.9)]);
        let mut source = VecSource::solid(5, 16, 16);
        source.fail_at = Some(2);
        let (result, _) = run(&mut source, &registry, FramePolicy::default());
        assert_matches!(result, Err(PipelineError::FramePipe(_)));
    }

    fn ten_second_clip() -> VideoInfo {
        VideoInfo {
            width: 320,
            height: 240,
            rotation: 0,
            frame_rate: "30/1".into(),
            fps: 30.0,
            duration_secs: 10.0,
            total_frames: 300,
        }
    }

    #[test]
    fn full_output_is_held_to_source_duration() {
        let info = ten_second_clip();
        // A mis-rated encode would write 300 frames but cover far less than
        // 10s; the expectation must not follow the frame count.
        assert_eq!(expected_output_secs(&info, 300, None), 10.0);
        assert_eq!(expected_output_secs(&info, 290, Some(500)), 10.0);
    }

    #[test]
    fn truncated_output_is_held_to_written_frames() {
        let info = ten_second_clip();
        assert!((expected_output_secs(&info, 90, Some(90)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn missing_source_duration_falls_back_to_frames() {
        let info = VideoInfo {
            duration_secs: 0.0,
            ..ten_second_clip()
        };
        assert!((expected_output_secs(&info, 150, None) - 5.0).abs() < 1e-9);
    }
}
