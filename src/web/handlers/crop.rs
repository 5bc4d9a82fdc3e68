// Crop prediction endpoint

use axum::{extract::State, http::StatusCode, Json};

use crate::api_server::AppState;
use crate::crop::recommend_fertilizer;
use crate::error::ApiError;
use crate::store::CropRecommendation;
use crate::web::auth::AuthUser;
use crate::web::soil_input::SoilInput;

/// POST /predict-crop/
///
/// Predict a crop, pick its fertilizer, store both the recommendation and a
/// history entry, and return the created recommendation.
pub async fn predict_crop(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    SoilInput(sample): SoilInput,
) -> Result<(StatusCode, Json<CropRecommendation>), ApiError> {
    let predictor = state.crop_predictor.clone();
    let store = state.store.clone();
    let user_id = user.id;

    // Forest votes run on rayon; keep them and the SQLite write off the async workers
    let (crop, fertilizer, saved) = tokio::task::spawn_blocking(move || {
        let crop = predictor.predict_crop(&sample);
        let fertilizer = recommend_fertilizer(sample.nitrogen, sample.phosphorus, sample.potassium, &crop);
        let saved = store.record_crop_prediction(user_id, &sample, &crop, fertilizer);
        (crop, fertilizer, saved)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Prediction task failed: {}", e)))?;

    tracing::info!(
        user = %user.username,
        "Predicted crop {} with fertilizer {}",
        crop,
        fertilizer
    );

    match saved {
        Ok(recommendation) => Ok((StatusCode::CREATED, Json(recommendation))),
        Err(e) => {
            tracing::error!("Failed to save crop prediction for {}: {}", user.username, e);
            let mut computed = serde_json::to_value(sample).unwrap_or_default();
            if let Some(fields) = computed.as_object_mut() {
                fields.insert("predicted_crop".to_string(), crop.into());
                fields.insert("recommended_fertilizer".to_string(), fertilizer.into());
            }
            Err(ApiError::Persistence {
                message: format!("Failed to save prediction: {}", e),
                computed: Some(computed),
            })
        }
    }
}
