//! Detection types and the per-video aggregate.
//!
//! A [`DetectionResult`] is assembled frame by frame through
//! [`DetectionResultBuilder`] and is immutable once built.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::VideoId;

/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box from center/size form, as emitted by YOLO heads.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Clamp to `[0, width] x [0, height]`.
    pub fn clamp(self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

/// One model output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Name of the model that produced the detection.
    pub model: String,
    pub class_id: usize,
    pub label: String,
    /// Model-reported score in `(0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// All detections for a single frame, merged across models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

/// Greedy per-class non-maximum suppression.
///
/// Keeps the highest-confidence box of every overlapping group (IoU above
/// `iou_threshold`) within the same class. Output is sorted by confidence,
/// highest first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Aggregate detections for one processed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub video_id: VideoId,
    /// Frames that carry at least one detection, in frame order.
    pub frames: Vec<FrameDetections>,
    /// Distinct labels across every frame.
    pub detected_species: BTreeSet<String>,
    /// Every detection's score, in frame order.
    pub confidence_scores: Vec<f32>,
    /// Frames written to the annotated output.
    pub frames_processed: u64,
    /// Frames on which inference actually ran.
    pub frames_analyzed: u64,
    /// Frames whose inference failed and were written un-annotated.
    pub skipped_frames: Vec<u64>,
}

impl DetectionResult {
    pub fn detection_count(&self) -> usize {
        self.confidence_scores.len()
    }

    /// All detections flattened in frame order.
    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.frames.iter().flat_map(|f| f.detections.iter())
    }
}

/// Incrementally accumulates per-frame detections.
#[derive(Debug)]
pub struct DetectionResultBuilder {
    video_id: VideoId,
    frames: Vec<FrameDetections>,
    frames_processed: u64,
    frames_analyzed: u64,
    skipped_frames: Vec<u64>,
}

impl DetectionResultBuilder {
    pub fn new(video_id: VideoId) -> Self {
        Self {
            video_id,
            frames: Vec::new(),
            frames_processed: 0,
            frames_analyzed: 0,
            skipped_frames: Vec::new(),
        }
    }

    /// Record the outcome of running inference on `frame_index`.
    pub fn record_analyzed(&mut self, frame_index: u64, detections: Vec<Detection>) {
        self.frames_analyzed += 1;
        if !detections.is_empty() {
            self.frames.push(FrameDetections {
                frame_index,
                detections,
            });
        }
    }

    pub fn record_skipped(&mut self, frame_index: u64) {
        self.skipped_frames.push(frame_index);
    }

    /// Count one frame written to the output.
    pub fn record_written(&mut self) {
        self.frames_processed += 1;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn build(self) -> DetectionResult {
        let mut detected_species = BTreeSet::new();
        let mut confidence_scores = Vec::new();
        for detection in self.frames.iter().flat_map(|f| f.detections.iter()) {
            detected_species.insert(detection.label.clone());
            confidence_scores.push(detection.confidence);
        }

        DetectionResult {
            video_id: self.video_id,
            frames: self.frames,
            detected_species,
            confidence_scores,
            frames_processed: self.frames_processed,
            frames_analyzed: self.frames_analyzed,
            skipped_frames: self.skipped_frames,
        }
    }
}
