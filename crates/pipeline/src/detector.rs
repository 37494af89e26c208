//! Object detectors.
//!
//! [`Detector`] is the seam between the pipeline and the model runtime.
//! [`OnnxDetector`] runs YOLOv8-style ONNX exports through ONNX Runtime;
//! tests substitute scripted detectors.

use std::path::Path;

use image::{Rgb, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use reefwatch_core::detection::{non_max_suppression, BoundingBox, Detection};

use crate::error::DetectorError;

/// Square model input edge used by YOLOv8 exports.
pub const INPUT_SIZE: u32 = 640;

/// IoU above which same-class boxes are merged.
pub const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Letterbox padding color (ultralytics uses mid gray).
const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// A model that finds labelled boxes in a frame.
pub trait Detector: Send {
    /// Model name, used in logs and on each [`Detection`].
    fn name(&self) -> &str;

    /// Detect objects in `frame`, keeping detections with
    /// `confidence >= min_confidence`. Boxes are in `frame` pixels.
    fn detect(&mut self, frame: &RgbImage, min_confidence: f32) -> Result<Vec<Detection>, DetectorError>;
}

/// Scale and offset applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a box from model-input space back to source-frame space.
    pub fn unmap(&self, bbox: BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: (bbox.x1 - self.pad_x) / self.scale,
            y1: (bbox.y1 - self.pad_y) / self.scale,
            x2: (bbox.x2 - self.pad_x) / self.scale,
            y2: (bbox.y2 - self.pad_y) / self.scale,
        }
    }
}

/// Resize `frame` to fit a `size`x`size` canvas preserving aspect ratio,
/// centering it on gray padding.
pub fn letterbox(frame: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = frame.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = image::imageops::resize(frame, new_w, new_h, image::imageops::FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, PAD_COLOR);
    image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Packed RGB to planar NCHW floats in `[0, 1]`.
pub fn to_nchw(image: &RgbImage) -> Vec<f32> {
    let plane = (image.width() * image.height()) as usize;
    let raw = image.as_raw();
    let mut data = vec![0f32; 3 * plane];
    for idx in 0..plane {
        data[idx] = raw[idx * 3] as f32 / 255.0;
        data[plane + idx] = raw[idx * 3 + 1] as f32 / 255.0;
        data[2 * plane + idx] = raw[idx * 3 + 2] as f32 / 255.0;
    }
    data
}

/// Everything needed to turn a raw YOLO head output into detections.
pub struct DecodeParams<'a> {
    pub model: &'a str,
    pub labels: &'a [String],
    pub min_confidence: f32,
    pub letterbox: Letterbox,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Decode a YOLOv8 output tensor.
///
/// Accepts `[1, 4 + C, N]` (the export default) or the transposed
/// `[1, N, 4 + C]`. Each proposal is `cx, cy, w, h` followed by one score
/// per class.
pub fn decode_yolo_output(
    dims: &[i64],
    data: &[f32],
    params: &DecodeParams<'_>,
) -> Result<Vec<Detection>, DetectorError> {
    let [batch, a, b] = dims else {
        return Err(DetectorError::OutputShape(dims.to_vec()));
    };
    if *batch != 1 || *a <= 0 || *b <= 0 {
        return Err(DetectorError::OutputShape(dims.to_vec()));
    }
    let (a, b) = (*a as usize, *b as usize);

    let channels_first = a >= 5 && a <= b;
    let (attrs, proposals) = if channels_first { (a, b) } else { (b, a) };
    if attrs < 5 || data.len() < attrs * proposals {
        return Err(DetectorError::OutputShape(dims.to_vec()));
    }
    let at = |attr: usize, i: usize| {
        if channels_first {
            data[attr * proposals + i]
        } else {
            data[i * attrs + attr]
        }
    };

    let (fw, fh) = (params.frame_width as f32, params.frame_height as f32);
    let mut candidates = Vec::new();

    for i in 0..proposals {
        let (class_id, score) = (4..attrs)
            .map(|attr| (attr - 4, at(attr, i)))
            .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score <= 0.0 || score < params.min_confidence {
            continue;
        }

        let raw = BoundingBox::from_center(at(0, i), at(1, i), at(2, i), at(3, i));
        let bbox = params.letterbox.unmap(raw).clamp(fw, fh);
        if bbox.area() <= 0.0 {
            continue;
        }

        candidates.push(Detection {
            model: params.model.to_string(),
            class_id,
            label: params
                .labels
                .get(class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{class_id}")),
            confidence: score.min(1.0),
            bbox,
        });
    }

    Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
}

/// YOLOv8 ONNX export running on ONNX Runtime (CPU).
pub struct OnnxDetector {
    name: String,
    session: Session,
    labels: Vec<String>,
}

impl OnnxDetector {
    pub fn load(path: &Path, name: impl Into<String>, labels: Vec<String>) -> Result<Self, DetectorError> {
        let load_err = |e: &dyn std::fmt::Display| DetectorError::Load {
            path: path.to_string_lossy().to_string(),
            message: e.to_string(),
        };

        let session = Session::builder()
            .map_err(|e| load_err(&e))?
            .commit_from_file(path)
            .map_err(|e| load_err(&e))?;

        Ok(Self {
            name: name.into(),
            session,
            labels,
        })
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, frame: &RgbImage, min_confidence: f32) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = letterbox(frame, INPUT_SIZE);
        let shape = [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
        let tensor = Tensor::from_array((shape, to_nchw(&input).into_boxed_slice()))
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| DetectorError::Inference("model produced no outputs".into()))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        decode_yolo_output(
            &dims,
            data,
            &DecodeParams {
                model: &self.name,
                labels: &self.labels,
                min_confidence,
                letterbox,
                frame_width: frame.width(),
                frame_height: frame.height(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const IDENTITY: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    fn labels() -> Vec<String> {
        vec!["fish".into(), "turtle".into()]
    }

    fn params<'a>(labels: &'a [String], min_confidence: f32) -> DecodeParams<'a> {
        DecodeParams {
            model: "reef",
            labels,
            min_confidence,
            letterbox: IDENTITY,
            frame_width: 640,
            frame_height: 640,
        }
    }

    /// Build a channels-first `[1, 6, N]` tensor from `(cx, cy, w, h, fish, turtle)` rows.
    fn channels_first(rows: &[[f32; 6]]) -> (Vec<i64>, Vec<f32>) {
        let n = rows.len();
        let mut data = vec![0f32; 6 * n];
        for (i, row) in rows.iter().enumerate() {
            for (attr, v) in row.iter().enumerate() {
                data[attr * n + i] = *v;
            }
        }
        (vec![1, 6, n as i64], data)
    }

    #[test]
    fn letterbox_pads_the_short_side() {
        let frame = RgbImage::new(1280, 720);
        let (canvas, lb) = letterbox(&frame, 640);
        assert_eq!(canvas.dimensions(), (640, 640));
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        assert_eq!(*canvas.get_pixel(0, 0), PAD_COLOR);
    }

    #[test]
    fn unmap_inverts_letterbox() {
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 140.0,
        };
        let b = lb.unmap(BoundingBox {
            x1: 10.0,
            y1: 150.0,
            x2: 20.0,
            y2: 160.0,
        });
        assert_eq!(
            b,
            BoundingBox {
                x1: 20.0,
                y1: 20.0,
                x2: 40.0,
                y2: 40.0
            }
        );
    }

    #[test]
    fn to_nchw_is_planar() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 51]));
        let data = to_nchw(&img);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.2]);
    }

    #[test]
    fn decode_picks_best_class_and_applies_threshold() {
        let labels = labels();
        let (dims, data) = channels_first(&[
            [100.0, 100.0, 20.0, 20.0, 0.9, 0.1],
            [300.0, 300.0, 40.0, 40.0, 0.2, 0.6],
            [500.0, 500.0, 40.0, 40.0, 0.3, 0.2],
        ]);

        let detections = decode_yolo_output(&dims, &data, &params(&labels, 0.5)).unwrap();
        let found: Vec<(&str, f32)> = detections
            .iter()
            .map(|d| (d.label.as_str(), d.confidence))
            .collect();
        assert_eq!(found, vec![("fish", 0.9), ("turtle", 0.6)]);
        assert_eq!(
            detections[0].bbox,
            BoundingBox {
                x1: 90.0,
                y1: 90.0,
                x2: 110.0,
                y2: 110.0
            }
        );
    }

    #[test]
    fn decode_accepts_transposed_layout() {
        let labels = labels();
        let data = vec![
            100.0, 100.0, 20.0, 20.0, 0.1, 0.8, //
            200.0, 200.0, 20.0, 20.0, 0.05, 0.0,
        ];
        let detections = decode_yolo_output(&[1, 2, 6], &data, &params(&labels, 0.25)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "turtle");
    }

    #[test]
    fn decode_merges_overlapping_boxes() {
        let labels = labels();
        let (dims, data) = channels_first(&[
            [100.0, 100.0, 40.0, 40.0, 0.7, 0.0],
            [102.0, 101.0, 40.0, 40.0, 0.9, 0.0],
        ]);
        let detections = decode_yolo_output(&dims, &data, &params(&labels, 0.5)).unwrap();
        assert_eq!(detections.len(), 1);
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn decode_labels_unknown_classes_by_index() {
        let (dims, data) = channels_first(&[[100.0, 100.0, 20.0, 20.0, 0.0, 0.9]]);
        let detections = decode_yolo_output(&dims, &data, &params(&[], 0.5)).unwrap();
        assert_eq!(detections[0].label, "class_1");
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        assert_matches!(
            decode_yolo_output(&[1, 6], &[], &params(&labels(), 0.5)),
            Err(DetectorError::OutputShape(_))
        );
        assert_matches!(
            decode_yolo_output(&[1, 6, 10], &[0.0; 12], &params(&labels(), 0.5)),
            Err(DetectorError::OutputShape(_))
        );
    }
}
