//! Plant disease recognition
//!
//! - `recognizer`: the `DiseaseRecognizer` component and its `Outcome`
//! - `loaders`: ordered model-loading strategies
//! - `results`: tabular / box-list result shapes and best-detection extraction
//! - `onnx`: tract-backed detector and legacy classifier
//! - `preprocess`: image decoding and tensor layout
//! - `labels`: sentinels, legacy vocabulary, label canonicalisation
//! - `treatment`: advisory text per disease

pub mod labels;
pub mod loaders;
pub mod onnx;
pub mod preprocess;
pub mod recognizer;
pub mod results;
pub mod treatment;

pub use labels::{canonical_label, ERROR_DURING_PREDICTION, HEALTHY, MODEL_NOT_LOADED};
pub use recognizer::{
    Detector, DiseaseRecognizer, ImageClassifier, Outcome, Prediction, RecognizerPaths,
};
pub use results::{Detection, DetectionBox, DetectionResult};
pub use treatment::TreatmentCatalog;
