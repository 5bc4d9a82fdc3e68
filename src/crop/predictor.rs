//! Crop Predictor
//!
//! Wraps a pre-trained random forest exported to JSON (one node array per
//! tree, scikit-learn layout). The artifact is loaded once at startup and any
//! problem with it is a construction-time error.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Deserialize;

use super::SoilSample;
use crate::error::ModelError;

/// Number of input features (N, P, K, pH, rainfall, humidity, temperature)
pub const FEATURE_COUNT: usize = 7;

/// Anything that maps a feature vector to a crop label
pub trait CropClassifier: Send + Sync {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> String;
}

/// One decision tree. Leaves have `children_left[i] == -1`.
#[derive(Debug, Deserialize)]
struct DecisionTree {
    children_left: Vec<i64>,
    children_right: Vec<i64>,
    feature: Vec<i64>,
    threshold: Vec<f64>,
    /// Per-node class counts (or weights)
    value: Vec<Vec<f64>>,
}

impl DecisionTree {
    fn validate(&self, index: usize, n_classes: usize) -> Result<(), ModelError> {
        let n = self.children_left.len();
        if n == 0 {
            return Err(ModelError::Incompatible(format!("tree {} has no nodes", index)));
        }
        if self.children_right.len() != n
            || self.feature.len() != n
            || self.threshold.len() != n
            || self.value.len() != n
        {
            return Err(ModelError::Incompatible(format!(
                "tree {} has node arrays of different lengths",
                index
            )));
        }

        for node in 0..n {
            if self.value[node].len() != n_classes {
                return Err(ModelError::Incompatible(format!(
                    "tree {} node {} has {} class weights, expected {}",
                    index,
                    node,
                    self.value[node].len(),
                    n_classes
                )));
            }
            let left = self.children_left[node];
            if left == -1 {
                continue;
            }
            let right = self.children_right[node];
            let feature = self.feature[node];
            let in_range = |child: i64| child > node as i64 && (child as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(ModelError::Incompatible(format!(
                    "tree {} node {} has invalid children ({}, {})",
                    index, node, left, right
                )));
            }
            if feature < 0 || feature as usize >= FEATURE_COUNT {
                return Err(ModelError::Incompatible(format!(
                    "tree {} node {} splits on feature {}",
                    index, node, feature
                )));
            }
        }
        Ok(())
    }

    /// Normalised class distribution of the leaf reached by `x`
    fn leaf_distribution(&self, x: &[f64; FEATURE_COUNT]) -> Vec<f64> {
        let mut node = 0usize;
        while self.children_left[node] != -1 {
            let feature = self.feature[node] as usize;
            node = if x[feature] <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }

        let counts = &self.value[node];
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            counts.iter().map(|c| c / total).collect()
        } else {
            vec![0.0; counts.len()]
        }
    }
}

/// Random forest classifier: averages tree probabilities, takes the argmax
#[derive(Debug, Deserialize)]
pub struct ForestModel {
    #[serde(default = "default_feature_count")]
    n_features: usize,
    classes: Vec<String>,
    trees: Vec<DecisionTree>,
}

fn default_feature_count() -> usize {
    FEATURE_COUNT
}

impl ForestModel {
    /// Parse and validate a forest from its JSON text
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let model: ForestModel = serde_json::from_str(json)
            .map_err(|e| ModelError::Incompatible(format!("invalid forest JSON: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::Missing(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.n_features != FEATURE_COUNT {
            return Err(ModelError::Incompatible(format!(
                "model expects {} features, predictor supplies {}",
                self.n_features, FEATURE_COUNT
            )));
        }
        if self.classes.is_empty() {
            return Err(ModelError::Incompatible("model has no classes".to_string()));
        }
        if self.trees.is_empty() {
            return Err(ModelError::Incompatible("model has no trees".to_string()));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(index, self.classes.len())?;
        }
        Ok(())
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl CropClassifier for ForestModel {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> String {
        let n_classes = self.classes.len();
        let summed = self
            .trees
            .par_iter()
            .map(|tree| tree.leaf_distribution(features))
            .reduce(
                || vec![0.0; n_classes],
                |mut acc, dist| {
                    for (a, d) in acc.iter_mut().zip(dist) {
                        *a += d;
                    }
                    acc
                },
            );

        // First maximum wins on ties
        let mut best = 0;
        for (i, p) in summed.iter().enumerate() {
            if *p > summed[best] {
                best = i;
            }
        }
        self.classes[best].clone()
    }
}

/// Crop Predictor: one shared classifier, constructed once at process start
#[derive(Clone)]
pub struct CropPredictor {
    classifier: Arc<dyn CropClassifier>,
}

impl CropPredictor {
    /// Load the forest artifact. Fails fast if it is missing or incompatible.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let model = ForestModel::load(path)?;
        tracing::info!(
            "Loaded crop model from {} ({} trees, {} classes)",
            path.display(),
            model.n_trees(),
            model.classes().len()
        );
        Ok(Self::new(Arc::new(model)))
    }

    pub fn new(classifier: Arc<dyn CropClassifier>) -> Self {
        Self { classifier }
    }

    /// Predict a crop label. Inputs are passed through unchecked.
    pub fn predict_crop(&self, sample: &SoilSample) -> String {
        self.classifier.predict(&sample.features())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Root splits on rainfall (feature 4) at 150: left → rice-heavy leaf, right → maize leaf
    const TWO_LEAF_FOREST: &str = r#"{
        "classes": ["maize", "rice"],
        "trees": [
            {
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [4, -2, -2],
                "threshold": [150.0, -2.0, -2.0],
                "value": [[5.0, 5.0], [9.0, 1.0], [0.0, 10.0]]
            },
            {
                "children_left": [-1],
                "children_right": [-1],
                "feature": [-2],
                "threshold": [-2.0],
                "value": [[3.0, 7.0]]
            }
        ]
    }"#;

    #[test]
    fn test_forest_averages_tree_probabilities() {
        let forest = ForestModel::from_json(TWO_LEAF_FOREST).unwrap();
        let predictor = CropPredictor::new(Arc::new(forest));

        // Low rainfall: (0.9 + 0.3) / 2 = 0.6 maize vs 0.4 rice
        let dry = SoilSample { rainfall: 100.0, ..Default::default() };
        assert_eq!(predictor.predict_crop(&dry), "maize");

        // High rainfall: 0.15 maize vs 0.85 rice
        let wet = SoilSample { rainfall: 200.0, ..Default::default() };
        assert_eq!(predictor.predict_crop(&wet), "rice");
    }

    #[test]
    fn test_nonsensical_inputs_are_passed_through() {
        let forest = ForestModel::from_json(TWO_LEAF_FOREST).unwrap();
        let sample = SoilSample { rainfall: -1e9, ph: -3.0, ..Default::default() };
        assert_eq!(forest.predict(&sample.features()), "maize");
    }

    #[test]
    fn test_missing_artifact_fails_at_construction() {
        let err = CropPredictor::load(Path::new("/nonexistent/crop_model.json")).err();
        assert!(matches!(err, Some(ModelError::Missing(_))));
    }

    #[test]
    fn test_incompatible_artifact_fails_at_construction() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"n_features": 4, "classes": ["rice"], "trees": []}}"#).unwrap();
        assert!(matches!(
            CropPredictor::load(file.path()),
            Err(ModelError::Incompatible(_))
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        garbage.write_all(b"\x80\x04pickle").unwrap();
        assert!(CropPredictor::load(garbage.path()).is_err());
    }

    #[test]
    fn test_broken_tree_rejected() {
        let json = r#"{
            "classes": ["rice"],
            "trees": [{
                "children_left": [5],
                "children_right": [6],
                "feature": [0],
                "threshold": [1.0],
                "value": [[1.0]]
            }]
        }"#;
        assert!(ForestModel::from_json(json).is_err());
    }
}
