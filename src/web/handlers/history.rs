// Read-only history endpoints. All listings are the caller's own records, newest first.

use axum::{extract::State, Json};

use super::pest::DetectionRecordView;
use crate::api_server::AppState;
use crate::config::DetectionPolicy;
use crate::error::{ApiError, StoreError};
use crate::store::{CropRecommendation, PredictionHistoryEntry, Store};
use crate::web::auth::AuthUser;

/// Run a read against the store off the async runtime
async fn read<T, F>(state: &AppState, what: &str, query: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || query(&store))
        .await
        .map_err(|e| ApiError::Internal(format!("History task failed: {}", e)))?
        .map_err(|e| {
            tracing::error!("Failed to load {}: {}", what, e);
            ApiError::Internal(format!("Failed to load {}: {}", what, e))
        })
}

/// GET /prediction-history/
pub async fn prediction_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<PredictionHistoryEntry>>, ApiError> {
    let entries = read(&state, "prediction history", move |store| {
        store.prediction_history(user.id)
    })
    .await?;
    Ok(Json(entries))
}

/// GET /recommendations/
pub async fn crop_recommendations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<CropRecommendation>>, ApiError> {
    let records = read(&state, "recommendations", move |store| {
        store.crop_recommendations(user.id)
    })
    .await?;
    Ok(Json(records))
}

/// GET /api/history/
///
/// Always empty when detections are not persisted.
pub async fn detection_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<DetectionRecordView>>, ApiError> {
    if state.config.detection_policy == DetectionPolicy::Ephemeral {
        return Ok(Json(Vec::new()));
    }

    let records = read(&state, "detection history", move |store| {
        store.detection_history(user.id)
    })
    .await?;
    Ok(Json(records.into_iter().map(DetectionRecordView::from).collect()))
}
