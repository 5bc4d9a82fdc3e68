//! Disease Recognizer
//!
//! Holds an optional detector and an optional legacy classifier, both fixed at
//! construction. Construction never fails: with nothing loaded the recognizer
//! runs in simulation mode and reports `Outcome::NoModel` for every image.
//! Inference never returns an error or panics into the caller.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tract_onnx::prelude::tract_ndarray::Array4;

use super::labels::{ERROR_DURING_PREDICTION, HEALTHY, LEGACY_CATEGORIES, MODEL_NOT_LOADED};
use super::loaders::{
    default_detector_loaders, load_first, ClassifierLoader, DetectorLoader, LegacyLoader,
};
use super::preprocess::preprocess_legacy;
use super::results::{clamp_confidence, Detection, DetectionResult};
use crate::config::AppConfig;
use crate::error::RecognizerError;

/// An object detector run directly on an image file
pub trait Detector: Send + Sync {
    fn detect(&self, image_path: &Path) -> Result<DetectionResult, RecognizerError>;
}

/// A classifier over a preprocessed batch of one; returns one score per class
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, batch: Array4<f32>) -> Result<Vec<f32>, RecognizerError>;
}

/// What one recognition attempt produced
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Found(Detection),
    /// The detector ran and reported nothing, and no fallback classified the image
    NotFound,
    /// Simulation mode
    NoModel,
    Failed(String),
}

/// Label + confidence pair handed to callers; confidence in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl From<Outcome> for Prediction {
    fn from(outcome: Outcome) -> Self {
        let (label, confidence) = match outcome {
            Outcome::Found(d) => (d.label, d.confidence),
            Outcome::NotFound => (HEALTHY.to_string(), 0.0),
            Outcome::NoModel => (MODEL_NOT_LOADED.to_string(), 0.0),
            Outcome::Failed(_) => (ERROR_DURING_PREDICTION.to_string(), 0.0),
        };
        Prediction { label, confidence }
    }
}

/// Artifact locations the recognizer loads from
#[derive(Debug, Clone)]
pub struct RecognizerPaths {
    pub weights: PathBuf,
    pub reference_dir: PathBuf,
    pub legacy: PathBuf,
}

impl RecognizerPaths {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            weights: config.detector_weights.clone(),
            reference_dir: config.detector_reference_dir.clone(),
            legacy: config.legacy_model_path.clone(),
        }
    }
}

pub struct DiseaseRecognizer {
    detector: Option<Arc<dyn Detector>>,
    legacy: Option<Arc<dyn ImageClassifier>>,
    strategy: Option<&'static str>,
}

impl DiseaseRecognizer {
    /// Run the production loader chain, then try the legacy classifier
    pub fn load(paths: &RecognizerPaths) -> Self {
        let loaders = default_detector_loaders(&paths.reference_dir);
        Self::load_with(&loaders, &paths.weights, &LegacyLoader, &paths.legacy)
    }

    pub fn load_with(
        loaders: &[Box<dyn DetectorLoader>],
        weights: &Path,
        legacy_loader: &dyn ClassifierLoader,
        legacy_path: &Path,
    ) -> Self {
        let (detector, report) = load_first(loaders, weights);
        if detector.is_none() {
            tracing::warn!(
                "No detector strategy succeeded for {}: {}",
                weights.display(),
                report.summary()
            );
        }

        let legacy = match legacy_loader.load(legacy_path) {
            Ok(classifier) => {
                tracing::info!("Legacy classifier loaded from {}", legacy_path.display());
                Some(classifier)
            }
            Err(e) => {
                tracing::info!("Legacy classifier unavailable: {:#}", e);
                None
            }
        };

        let recognizer = Self {
            strategy: report.loaded_by.or(legacy.as_ref().map(|_| "legacy")),
            detector,
            legacy,
        };
        if recognizer.is_simulation() {
            tracing::warn!("Disease recognizer running in simulation mode");
        }
        recognizer
    }

    pub fn new(detector: Option<Arc<dyn Detector>>, legacy: Option<Arc<dyn ImageClassifier>>) -> Self {
        let strategy = match (&detector, &legacy) {
            (Some(_), _) => Some("detector"),
            (None, Some(_)) => Some("legacy"),
            (None, None) => None,
        };
        Self {
            detector,
            legacy,
            strategy,
        }
    }

    /// No handles at all
    pub fn simulation() -> Self {
        Self::new(None, None)
    }

    /// Name of the strategy that produced the active handle
    pub fn strategy(&self) -> Option<&'static str> {
        self.strategy
    }

    pub fn is_simulation(&self) -> bool {
        self.detector.is_none() && self.legacy.is_none()
    }

    pub fn recognize(&self, image_path: &Path) -> Outcome {
        if self.is_simulation() {
            return Outcome::NoModel;
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.run(image_path))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::Failed("inference panicked".to_string()),
        };

        match &outcome {
            Outcome::Failed(reason) => {
                tracing::error!("Prediction failed for {}: {}", image_path.display(), reason)
            }
            other => tracing::debug!(outcome = ?other, "Prediction for {}", image_path.display()),
        }
        outcome
    }

    /// `recognize` collapsed to a label/confidence pair
    pub fn predict(&self, image_path: &Path) -> Prediction {
        self.recognize(image_path).into()
    }

    fn run(&self, image_path: &Path) -> Result<Outcome, RecognizerError> {
        if let Some(detector) = &self.detector {
            let result = detector.detect(image_path)?;
            tracing::debug!(
                shape = result.shape_name(),
                detections = result.len(),
                "Detector finished"
            );
            if let Some(best) = result.best()? {
                return Ok(Outcome::Found(best));
            }
        }

        match &self.legacy {
            Some(classifier) => self.classify_legacy(classifier.as_ref(), image_path),
            None => Ok(Outcome::NotFound),
        }
    }

    fn classify_legacy(
        &self,
        classifier: &dyn ImageClassifier,
        image_path: &Path,
    ) -> Result<Outcome, RecognizerError> {
        let batch = preprocess_legacy(image_path)?;
        let scores = classifier.classify(batch)?;
        if scores.len() != LEGACY_CATEGORIES.len() {
            return Err(RecognizerError::Parse(format!(
                "legacy classifier returned {} scores, expected {}",
                scores.len(),
                LEGACY_CATEGORIES.len()
            )));
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, &score) in scores.iter().enumerate() {
            if score.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, current)| score > current) {
                best = Some((i, score));
            }
        }

        let (index, score) = best
            .ok_or_else(|| RecognizerError::Parse("legacy classifier returned no usable scores".to_string()))?;
        Ok(Outcome::Found(Detection {
            label: LEGACY_CATEGORIES[index].to_string(),
            confidence: clamp_confidence(score as f64),
        }))
    }
}
