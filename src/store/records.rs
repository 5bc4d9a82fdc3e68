//! Persisted record types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crop::SoilSample;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub api_token: String,
    pub email: String,
    pub farm_location: String,
    pub phone: String,
    pub created_at: String,
}

/// Account fields captured at registration
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub farm_location: String,
    pub phone: String,
    /// Output of `password::hash_password`, empty for token-only accounts
    pub password_hash: String,
}

/// Profile fields a user may change; `None` leaves the field as it is
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub farm_location: Option<String>,
    pub phone: Option<String>,
}

/// One crop prediction with the inputs it was made from
#[derive(Debug, Clone, Serialize)]
pub struct CropRecommendation {
    pub id: i64,
    #[serde(rename = "user")]
    pub user_id: i64,
    #[serde(flatten)]
    pub soil: SoilSample,
    pub predicted_crop: String,
    pub recommended_fertilizer: String,
    pub created_at: String,
}

/// Denormalised history row listed by the prediction-history endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PredictionHistoryEntry {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub prediction_date: String,
    pub crop: String,
    pub fertilizer: String,
    pub soil_params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiseaseDetection {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub username: String,
    /// Path relative to the media root
    pub image: String,
    pub detected_disease: String,
    /// Fraction in [0, 1]
    pub confidence: f64,
    pub treatment: String,
    pub created_at: String,
}

/// Fields of a detection before it is stored
#[derive(Debug, Clone)]
pub struct NewDetection {
    pub detected_disease: String,
    pub confidence: f64,
    pub treatment: String,
}
