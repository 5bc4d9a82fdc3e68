//! Crop recommendation
//!
//! - `predictor`: pre-trained crop classifier over seven soil/climate features
//! - `fertilizer`: NPK threshold rules per crop

pub mod fertilizer;
pub mod predictor;

pub use fertilizer::{recommend_fertilizer, GENERIC_FERTILIZER_ADVICE, NPK_LOW_THRESHOLD};
pub use predictor::{CropClassifier, CropPredictor, ForestModel, FEATURE_COUNT};

use serde::{Deserialize, Serialize};

/// Seven-feature soil and climate measurement. Transient input, never stored on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SoilSample {
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub ph: f64,
    pub rainfall: f64,
    pub humidity: f64,
    pub temperature: f64,
}

impl SoilSample {
    /// Field names in classifier feature order
    pub const FIELDS: [&'static str; FEATURE_COUNT] = [
        "nitrogen",
        "phosphorus",
        "potassium",
        "ph",
        "rainfall",
        "humidity",
        "temperature",
    ];

    /// Feature vector in the order the classifier was trained on
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.nitrogen,
            self.phosphorus,
            self.potassium,
            self.ph,
            self.rainfall,
            self.humidity,
            self.temperature,
        ]
    }

    pub fn from_features(values: [f64; FEATURE_COUNT]) -> Self {
        let [nitrogen, phosphorus, potassium, ph, rainfall, humidity, temperature] = values;
        Self {
            nitrogen,
            phosphorus,
            potassium,
            ph,
            rainfall,
            humidity,
            temperature,
        }
    }

    /// JSON object keyed by field name, as stored in prediction history
    pub fn to_params_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
