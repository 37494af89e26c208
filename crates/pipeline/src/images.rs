//! Still-image prediction.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use reefwatch_core::detection::Detection;
use reefwatch_core::media;
use reefwatch_core::naming;
use reefwatch_core::types::VideoId;
use serde::Serialize;

use crate::error::PipelineError;
use crate::overlay::Overlay;
use crate::registry::ModelRegistry;

/// One uploaded still, held in memory.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Sanitized client filename.
    pub original_filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePrediction {
    pub original_filename: String,
    pub result_filename: String,
    pub url: String,
    pub detected_species: Vec<String>,
    pub confidence_scores: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBatch {
    pub batch_id: VideoId,
    pub images: Vec<ImagePrediction>,
}

/// Decode an image and rotate/flip it upright according to its EXIF
/// orientation.
pub fn decode_oriented(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image.to_rgb8())
}

/// Extension an annotated copy is written with. WebP inputs are written as
/// PNG since the encoder only supports lossless output.
pub fn output_extension(original_filename: &str) -> &'static str {
    match media::extension(original_filename).as_deref() {
        Some("jpg") | Some("jpeg") => "jpg",
        _ => "png",
    }
}

/// Detect on one decoded image and draw the results onto it.
pub fn annotate_image(
    image: &mut RgbImage,
    registry: &ModelRegistry,
    overlay: &Overlay,
    thresholds: &[f32],
) -> Result<Vec<Detection>, PipelineError> {
    let detections = registry.detect(image, thresholds)?;
    overlay.draw(image, &detections);
    Ok(detections)
}

/// Annotate every image of a batch and write the results into
/// `results_dir`. Blocking.
pub fn predict_batch(
    batch_id: VideoId,
    images: &[UploadedImage],
    registry: &ModelRegistry,
    overlay: &Overlay,
    thresholds: &[f32],
    results_dir: &Path,
) -> Result<ImageBatch, PipelineError> {
    let mut predictions = Vec::with_capacity(images.len());

    for (index, upload) in images.iter().enumerate() {
        let mut image = decode_oriented(&upload.bytes)?;
        let detections = annotate_image(&mut image, registry, overlay, thresholds)?;

        let result_filename = naming::image_result_filename(
            &batch_id,
            index,
            output_extension(&upload.original_filename),
        );
        image.save(results_dir.join(&result_filename))?;

        let species: BTreeSet<String> = detections.iter().map(|d| d.label.clone()).collect();
        tracing::debug!(
            %batch_id,
            index,
            file = %upload.original_filename,
            detections = detections.len(),
            "Annotated image"
        );

        predictions.push(ImagePrediction {
            original_filename: upload.original_filename.clone(),
            url: naming::result_url(&result_filename),
            result_filename,
            detected_species: species.into_iter().collect(),
            confidence_scores: detections.iter().map(|d| d.confidence).collect(),
        });
    }

    Ok(ImageBatch {
        batch_id,
        images: predictions,
    })
}
