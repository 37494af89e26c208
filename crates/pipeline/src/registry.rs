//! Loaded detection models.
//!
//! The registry is built once at startup and shared by every request. Each
//! detector sits behind its own mutex so concurrent pipelines can share
//! the loaded weights.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use reefwatch_core::detection::Detection;
use serde::Deserialize;

use crate::detector::{Detector, OnnxDetector};
use crate::error::{ConfigError, DetectorError};

/// Optional `<model>.json` next to each `<model>.onnx`.
#[derive(Debug, Default, Deserialize)]
pub struct ModelSidecar {
    #[serde(default)]
    pub labels: Vec<String>,
    pub confidence_threshold: Option<f32>,
}

struct ModelSlot {
    name: String,
    threshold: f32,
    detector: Mutex<Box<dyn Detector>>,
}

/// Public description of a loaded model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub confidence_threshold: f32,
}

pub struct ModelRegistry {
    slots: Vec<ModelSlot>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| (&s.name, s.threshold)))
            .finish()
    }
}

impl ModelRegistry {
    /// Build a registry from already-constructed detectors and their
    /// thresholds, in invocation order.
    pub fn from_detectors(detectors: Vec<(Box<dyn Detector>, f32)>) -> Self {
        let slots = detectors
            .into_iter()
            .map(|(detector, threshold)| ModelSlot {
                name: detector.name().to_string(),
                threshold,
                detector: Mutex::new(detector),
            })
            .collect();
        Self { slots }
    }

    /// Load every `*.onnx` file in `dir`, in filename order.
    ///
    /// An empty directory is a configuration error: the service is useless
    /// without models.
    pub fn load_dir(dir: &Path, default_threshold: f32) -> Result<Self, ConfigError> {
        let models = discover_models(dir)?;
        if models.is_empty() {
            return Err(ConfigError::NoModels(dir.to_string_lossy().to_string()));
        }

        let mut detectors: Vec<(Box<dyn Detector>, f32)> = Vec::with_capacity(models.len());
        for path in models {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let sidecar = read_sidecar(&path.with_extension("json"))?;
            if sidecar.labels.is_empty() {
                tracing::warn!(model = %name, "No labels sidecar; classes will be reported by index");
            }
            let threshold = sidecar.confidence_threshold.unwrap_or(default_threshold);
            let detector = OnnxDetector::load(&path, name.clone(), sidecar.labels)?;
            tracing::info!(model = %name, threshold, path = %path.display(), "Loaded detection model");
            detectors.push((Box::new(detector), threshold));
        }

        Ok(Self::from_detectors(detectors))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        self.slots
            .iter()
            .map(|s| ModelInfo {
                name: s.name.clone(),
                confidence_threshold: s.threshold,
            })
            .collect()
    }

    /// Run every model on `frame` and merge their detections in registry
    /// order.
    ///
    /// `overrides[i]`, when present, replaces model `i`'s threshold. Any
    /// single model failure fails the whole frame.
    pub fn detect(&self, frame: &RgbImage, overrides: &[f32]) -> Result<Vec<Detection>, DetectorError> {
        let mut merged = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            let threshold = overrides.get(i).copied().unwrap_or(slot.threshold);
            let mut detector = slot.detector.lock().map_err(|_| DetectorError::Poisoned)?;
            merged.extend(detector.detect(frame, threshold)?);
        }
        Ok(merged)
    }
}

fn discover_models(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::ModelsDir {
        path: dir.to_string_lossy().to_string(),
        source,
    })?;

    let mut models: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        })
        .collect();
    models.sort();
    Ok(models)
}

fn read_sidecar(path: &Path) -> Result<ModelSidecar, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ModelSidecar::default()),
        Err(e) => {
            return Err(ConfigError::Sidecar {
                path: path.to_string_lossy().to_string(),
                message: e.to_string(),
            })
        }
    };

    let sidecar: ModelSidecar = serde_json::from_str(&text).map_err(|e| ConfigError::Sidecar {
        path: path.to_string_lossy().to_string(),
        message: e.to_string(),
    })?;

    if let Some(t) = sidecar.confidence_threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(ConfigError::Sidecar {
                path: path.to_string_lossy().to_string(),
                message: format!("confidence_threshold {t} is outside [0, 1]"),
            });
        }
    }
    Ok(sidecar)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use reefwatch_core::detection::BoundingBox;

    use super::*;

    /// Emits one fixed detection per call and records the thresholds it saw.
    pub(crate) struct ScriptedDetector {
        pub name: String,
        pub label: String,
        pub confidence: f32,
        pub calls: Arc<AtomicUsize>,
        pub fail_on_call: Option<usize>,
    }

    impl ScriptedDetector {
        pub(crate) fn new(name: &str, label: &str, confidence: f32) -> Self {
            Self {
                name: name.into(),
                label: label.into(),
                confidence,
                calls: Arc::new(AtomicUsize::new(0)),
                fail_on_call: None,
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn name(&self) -> &str {
            &self.name
        }

        fn detect(&mut self, frame: &RgbImage, min_confidence: f32) -> Result<Vec<Detection>, DetectorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(DetectorError::Inference("scripted failure".into()));
            }
            if self.confidence < min_confidence {
                return Ok(vec![]);
            }
            Ok(vec![Detection {
                model: self.name.clone(),
                class_id: 0,
                label: self.label.clone(),
                confidence: self.confidence,
                bbox: BoundingBox {
                    x1: 1.0,
                    y1: 1.0,
                    x2: (frame.width() / 2) as f32,
                    y2: (frame.height() / 2) as f32,
                },
            }])
        }
    }

    fn registry(detectors: Vec<ScriptedDetector>) -> ModelRegistry {
        ModelRegistry::from_detectors(
            detectors
                .into_iter()
                .map(|d| (Box::new(d) as Box<dyn Detector>, 0.5))
                .collect(),
        )
    }

    #[test]
    fn merges_models_in_order() {
        let reg = registry(vec![
            ScriptedDetector::new("fish_model", "fish", 0.9),
            ScriptedDetector::new("megafauna", "shark", 0.7),
        ]);
        let detections = reg.detect(&RgbImage::new(20, 20), &[]).unwrap();
        let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["fish", "shark"]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn overrides_replace_thresholds_positionally() {
        let reg = registry(vec![
            ScriptedDetector::new("a", "fish", 0.6),
            ScriptedDetector::new("b", "turtle", 0.6),
        ]);
        let detections = reg.detect(&RgbImage::new(20, 20), &[0.9]).unwrap();
        let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["turtle"]);
    }

    #[test]
    fn one_failing_model_fails_the_frame() {
        let mut failing = ScriptedDetector::new("b", "turtle", 0.9);
        failing.fail_on_call = Some(0);
        let reg = registry(vec![ScriptedDetector::new("a", "fish", 0.9), failing]);
        assert_matches!(
            reg.detect(&RgbImage::new(20, 20), &[]),
            Err(DetectorError::Inference(_))
        );
    }

    #[test]
    fn empty_models_dir_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), "no models here").unwrap();
        assert_matches!(
            ModelRegistry::load_dir(dir.path(), 0.5),
            Err(ConfigError::NoModels(_))
        );
    }

    #[test]
    fn missing_models_dir_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            ModelRegistry::load_dir(&dir.path().join("absent"), 0.5),
            Err(ConfigError::ModelsDir { .. })
        );
    }

    #[test]
    fn sidecar_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fish.json");

        assert!(read_sidecar(&path).unwrap().labels.is_empty());

        std::fs::write(&path, r#"{"labels": ["fish", "ray"], "confidence_threshold": 0.4}"#).unwrap();
        let sidecar = read_sidecar(&path).unwrap();
        assert_eq!(sidecar.labels, vec!["fish", "ray"]);
        assert_eq!(sidecar.confidence_threshold, Some(0.4));

        std::fs::write(&path, r#"{"confidence_threshold": 1.5}"#).unwrap();
        assert_matches!(read_sidecar(&path), Err(ConfigError::Sidecar { .. }));
    }
}
