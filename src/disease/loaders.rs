//! Model loading strategies
//!
//! Detector loaders are tried in order and the first success wins. Failures
//! are collected into a `LoadReport` so a total failure can be logged once
//! with every reason.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use super::labels::LEGACY_CATEGORIES;
use super::onnx::{DetectorSettings, OnnxClassifier, OnnxDetector, ResultShape};
use super::recognizer::{Detector, ImageClassifier};

/// One way of turning a weights path into a detector handle
pub trait DetectorLoader: Send + Sync {
    fn name(&self) -> &'static str;
    fn load(&self, weights: &Path) -> anyhow::Result<Arc<dyn Detector>>;
}

/// Loads the legacy fallback classifier
pub trait ClassifierLoader: Send + Sync {
    fn load(&self, path: &Path) -> anyhow::Result<Arc<dyn ImageClassifier>>;
}

/// Outcome of running the loader chain
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded_by: Option<&'static str>,
    pub failures: Vec<(&'static str, String)>,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|(name, reason)| format!("{}: {}", name, reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Try each loader in order, stopping at the first that succeeds
pub fn load_first(
    loaders: &[Box<dyn DetectorLoader>],
    weights: &Path,
) -> (Option<Arc<dyn Detector>>, LoadReport) {
    let mut report = LoadReport::default();

    for loader in loaders {
        match loader.load(weights) {
            Ok(detector) => {
                tracing::info!(
                    strategy = loader.name(),
                    "Detector loaded from {}",
                    weights.display()
                );
                report.loaded_by = Some(loader.name());
                return (Some(detector), report);
            }
            Err(e) => {
                tracing::warn!(strategy = loader.name(), "Detector loading failed: {:#}", e);
                report.failures.push((loader.name(), format!("{:#}", e)));
            }
        }
    }

    (None, report)
}

/// The production chain: hub manifest, direct, then the reference copy
pub fn default_detector_loaders(reference_dir: &Path) -> Vec<Box<dyn DetectorLoader>> {
    vec![
        Box::new(HubLoader),
        Box::new(DirectLoader),
        Box::new(ReferenceLoader {
            dir: reference_dir.to_path_buf(),
        }),
    ]
}

// ============================================================================
// Strategy 1: hub-style manifest next to the weights
// ============================================================================

pub const HUB_MANIFEST: &str = "hub.json";

#[derive(Debug, Deserialize)]
struct HubManifest {
    names: Vec<String>,
    #[serde(default)]
    input_size: Option<u32>,
    #[serde(default)]
    conf_threshold: Option<f32>,
    #[serde(default)]
    iou_threshold: Option<f32>,
}

pub struct HubLoader;

impl DetectorLoader for HubLoader {
    fn name(&self) -> &'static str {
        "hub"
    }

    fn load(&self, weights: &Path) -> anyhow::Result<Arc<dyn Detector>> {
        let manifest_path = weights
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(HUB_MANIFEST);
        let contents = fs::read_to_string(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let manifest: HubManifest = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", manifest_path.display()))?;

        let defaults = DetectorSettings::default();
        let settings = DetectorSettings {
            input_size: manifest.input_size.unwrap_or(defaults.input_size),
            conf_threshold: manifest.conf_threshold.unwrap_or(defaults.conf_threshold),
            iou_threshold: manifest.iou_threshold.unwrap_or(defaults.iou_threshold),
        };

        let detector = OnnxDetector::load(weights, manifest.names, settings, ResultShape::Tabular)?;
        Ok(Arc::new(detector))
    }
}

// ============================================================================
// Strategy 2: weights + sibling `.names` file
// ============================================================================

pub struct DirectLoader;

impl DetectorLoader for DirectLoader {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn load(&self, weights: &Path) -> anyhow::Result<Arc<dyn Detector>> {
        let names = read_names(&weights.with_extension("names"))?;
        let detector = OnnxDetector::load(weights, names, DetectorSettings::default(), ResultShape::BoxList)?;
        Ok(Arc::new(detector))
    }
}

// ============================================================================
// Strategy 3: local copy of the reference implementation
// ============================================================================

pub struct ReferenceLoader {
    pub dir: PathBuf,
}

impl DetectorLoader for ReferenceLoader {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn load(&self, weights: &Path) -> anyhow::Result<Arc<dyn Detector>> {
        if !self.dir.is_dir() {
            anyhow::bail!("reference directory {} not found", self.dir.display());
        }
        let file_name = weights
            .file_name()
            .context("weights path has no file name")?;
        let local_weights = self.dir.join(file_name);
        let names = read_names(&self.dir.join("names.txt"))?;

        let detector = OnnxDetector::load(&local_weights, names, DetectorSettings::default(), ResultShape::BoxList)?;
        Ok(Arc::new(detector))
    }
}

/// One class name per line, blank lines ignored
fn read_names(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let names: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        anyhow::bail!("{} lists no class names", path.display());
    }
    Ok(names)
}

// ============================================================================
// Legacy classifier
// ============================================================================

pub struct LegacyLoader;

impl ClassifierLoader for LegacyLoader {
    fn load(&self, path: &Path) -> anyhow::Result<Arc<dyn ImageClassifier>> {
        if !path.exists() {
            anyhow::bail!("legacy model {} not found", path.display());
        }
        let classifier = OnnxClassifier::load(path, LEGACY_CATEGORIES.len())?;
        Ok(Arc::new(classifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disease::results::DetectionResult;
    use crate::error::RecognizerError;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    /// `dir/best.onnx` copied from the fixture detector
    fn weights_in(dir: &Path) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let weights = dir.join("best.onnx");
        fs::copy(fixture("tiny_detector.onnx"), &weights).unwrap();
        weights
    }

    fn leaf_png(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("leaf.png");
        RgbImage::from_pixel(40, 40, Rgb([40, 160, 60])).save(&path).unwrap();
        path
    }

    struct Fails(&'static str);

    impl DetectorLoader for Fails {
        fn name(&self) -> &'static str {
            self.0
        }

        fn load(&self, _weights: &Path) -> anyhow::Result<Arc<dyn Detector>> {
            anyhow::bail!("{} unavailable", self.0)
        }
    }

    struct Empty;

    impl Detector for Empty {
        fn detect(&self, _image_path: &Path) -> Result<DetectionResult, RecognizerError> {
            Ok(DetectionResult::box_list(Vec::new(), vec!["leaf".to_string()]))
        }
    }

    struct Succeeds(&'static str);

    impl DetectorLoader for Succeeds {
        fn name(&self) -> &'static str {
            self.0
        }

        fn load(&self, _weights: &Path) -> anyhow::Result<Arc<dyn Detector>> {
            Ok(Arc::new(Empty))
        }
    }

    struct Unreachable;

    impl DetectorLoader for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn load(&self, _weights: &Path) -> anyhow::Result<Arc<dyn Detector>> {
            panic!("loaders after the first success must not run")
        }
    }

    #[test]
    fn test_first_success_short_circuits() {
        let loaders: Vec<Box<dyn DetectorLoader>> = vec![
            Box::new(Fails("hub")),
            Box::new(Succeeds("direct")),
            Box::new(Unreachable),
        ];
        let (detector, report) = load_first(&loaders, Path::new("best.onnx"));

        assert!(detector.is_some());
        assert_eq!(report.loaded_by, Some("direct"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "hub");
    }

    #[test]
    fn test_total_failure_aggregates_reasons() {
        let loaders: Vec<Box<dyn DetectorLoader>> =
            vec![Box::new(Fails("hub")), Box::new(Fails("direct")), Box::new(Fails("reference"))];
        let (detector, report) = load_first(&loaders, Path::new("best.onnx"));

        assert!(detector.is_none());
        assert_eq!(report.loaded_by, None);
        assert_eq!(report.failures.len(), 3);
        assert!(report.summary().contains("reference: reference unavailable"));
    }

    #[test]
    fn test_default_chain_fails_cleanly_without_artifacts() {
        let dir = tempfile::TempDir::new().unwrap();
        let loaders = default_detector_loaders(&dir.path().join("yolov5"));
        let names: Vec<_> = loaders.iter().map(|l| l.name()).collect();
        assert_eq!(names, ["hub", "direct", "reference"]);

        let (detector, report) = load_first(&loaders, &dir.path().join("best.onnx"));
        assert!(detector.is_none());
        assert_eq!(report.failures.len(), 3);
    }

    #[test]
    fn test_hub_manifest_yields_tabular_detector() {
        let dir = TempDir::new().unwrap();
        let weights = weights_in(dir.path());
        fs::write(
            dir.path().join(HUB_MANIFEST),
            r#"{"names": ["Apple Scab Leaf", "Tomato leaf"], "input_size": 32, "conf_threshold": 0.5}"#,
        )
        .unwrap();

        let detector = HubLoader.load(&weights).unwrap();
        let result = detector.detect(&leaf_png(&dir)).unwrap();
        assert_eq!(result.shape_name(), "tabular");
        // The 0.45 row falls under the manifest threshold
        assert_eq!(result.len(), 1);
        assert_eq!(result.best().unwrap().unwrap().label, "Tomato leaf");
    }

    #[test]
    fn test_hub_manifest_must_parse() {
        let dir = TempDir::new().unwrap();
        let weights = weights_in(dir.path());
        fs::write(dir.path().join(HUB_MANIFEST), r#"{"classes": []}"#).unwrap();

        let err = HubLoader.load(&weights).err().unwrap();
        assert!(format!("{:#}", err).contains("parsing"));
    }

    #[test]
    fn test_direct_loader_uses_sibling_names() {
        let dir = TempDir::new().unwrap();
        let weights = weights_in(dir.path());
        fs::write(weights.with_extension("names"), "Apple Scab Leaf\nTomato leaf\n").unwrap();

        let detector = DirectLoader.load(&weights).unwrap();
        let result = detector.detect(&leaf_png(&dir)).unwrap();
        assert_eq!(result.shape_name(), "box-list");
        assert_eq!(result.len(), 2);
        assert_eq!(result.best().unwrap().unwrap().label, "Tomato leaf");
    }

    #[test]
    fn test_reference_loader_reads_local_copy() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("yolov5");
        weights_in(&reference);
        fs::write(reference.join("names.txt"), "Apple Scab Leaf\nTomato leaf\n").unwrap();

        // The configured weights path itself does not exist
        let loader = ReferenceLoader { dir: reference };
        let detector = loader.load(&dir.path().join("models").join("best.onnx")).unwrap();
        let result = detector.detect(&leaf_png(&dir)).unwrap();
        assert_eq!(result.shape_name(), "box-list");
        assert_eq!(result.best().unwrap().unwrap().label, "Tomato leaf");
    }

    #[test]
    fn test_default_chain_falls_through_to_direct() {
        let dir = TempDir::new().unwrap();
        let weights = weights_in(dir.path());
        fs::write(weights.with_extension("names"), "Apple Scab Leaf\nTomato leaf\n").unwrap();

        let loaders = default_detector_loaders(&dir.path().join("yolov5"));
        let (detector, report) = load_first(&loaders, &weights);
        assert!(detector.is_some());
        assert_eq!(report.loaded_by, Some("direct"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "hub");
    }

    #[test]
    fn test_legacy_loader_loads_classifier() {
        let classifier = LegacyLoader.load(&fixture("tiny_classifier.onnx")).unwrap();
        let scores = classifier
            .classify(tract_onnx::prelude::tract_ndarray::Array4::zeros((1, 28, 28, 3)))
            .unwrap();
        assert_eq!(scores.len(), LEGACY_CATEGORIES.len());
    }

    #[test]
    fn test_read_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("best.names");
        fs::write(&path, "Apple Scab Leaf\n\n  Corn rust leaf \n").unwrap();
        assert_eq!(read_names(&path).unwrap(), ["Apple Scab Leaf", "Corn rust leaf"]);

        fs::write(&path, "\n\n").unwrap();
        assert!(read_names(&path).is_err());
    }

    #[test]
    fn test_legacy_loader_requires_artifact() {
        assert!(LegacyLoader.load(Path::new("/nonexistent/plant_disease_model.onnx")).is_err());
    }
}
