// Plant disease detection endpoint

use std::io::Write;
use std::path::{Path, PathBuf};

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::api_server::AppState;
use crate::config::DetectionPolicy;
use crate::disease::{canonical_label, Outcome, Prediction, ERROR_DURING_PREDICTION};
use crate::error::{ApiError, StoreError};
use crate::media;
use crate::store::{DiseaseDetection, NewDetection};
use crate::web::auth::AuthUser;

const IMAGE_FIELD: &str = "image";

/// Body of an ephemeral detection response
#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    pub disease: String,
    /// Percentage in [0, 100], two decimals
    pub confidence: f64,
    pub treatment: String,
}

/// A stored detection as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRecordView {
    pub id: i64,
    pub image_url: Option<String>,
    #[serde(flatten)]
    pub summary: DetectionSummary,
    pub created_at: String,
    pub username: String,
}

impl From<DiseaseDetection> for DetectionRecordView {
    fn from(record: DiseaseDetection) -> Self {
        Self {
            id: record.id,
            image_url: media::image_url(&record.image),
            summary: DetectionSummary {
                disease: record.detected_disease,
                confidence: as_percentage(record.confidence),
                treatment: record.treatment,
            },
            created_at: record.created_at,
            username: record.username,
        }
    }
}

/// Fraction in [0, 1] to a percentage rounded to two decimals
pub fn as_percentage(fraction: f64) -> f64 {
    let pct = (fraction.clamp(0.0, 1.0) * 100.0 * 100.0).round() / 100.0;
    if pct.is_nan() {
        0.0
    } else {
        pct
    }
}

struct Upload {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

/// Pull the `image` part out of the multipart body
async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<Upload, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        tracing::warn!("Rejected detection upload: {}", e.body_text());
        ApiError::BadRequest("No image file found".to_string())
    })?;

    while let Some(field) = multipart.next_field().await.map_err(rejected)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(rejected)?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("The submitted file is empty.".to_string()));
        }
        return Ok(Upload {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    tracing::warn!("No image file found in request");
    Err(ApiError::BadRequest("No image file found".to_string()))
}

fn rejected(e: MultipartError) -> ApiError {
    tracing::warn!("Could not read detection upload: {}", e.body_text());
    ApiError::Rejected {
        status: e.status(),
        message: e.body_text(),
    }
}

/// Write the upload to a uniquely named file; removed when the handle drops
fn write_temp(dir: &Path, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::Builder::new().prefix("upload-").tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

fn discard(temp: NamedTempFile) {
    let path = temp.path().to_path_buf();
    match temp.close() {
        Ok(()) => tracing::debug!("Deleted temporary file: {}", path.display()),
        Err(e) => tracing::warn!("Could not delete temporary file {}: {}", path.display(), e),
    }
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(format!("Detection task failed: {}", e))
}

/// POST /detect-pest/ (also /api/detect/, /api/detect-pest/)
pub async fn detect_pest(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    tracing::info!("Received plant disease detection request from user: {}", user.username);

    let upload = read_upload(multipart).await?;
    tracing::info!(
        "Processing image: {} ({} bytes)",
        upload.file_name.as_deref().unwrap_or("<unnamed>"),
        upload.bytes.len()
    );

    let tmp_dir = state.config.upload_tmp_dir.clone();
    let bytes = upload.bytes;
    let temp = tokio::task::spawn_blocking(move || write_temp(&tmp_dir, &bytes))
        .await
        .map_err(join_error)?
        .map_err(|e| ApiError::Internal(format!("Could not store upload: {}", e)))?;

    let outcome = match recognize(&state, temp.path().to_path_buf()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            discard(temp);
            return Err(e);
        }
    };

    let prediction = match outcome {
        Outcome::Failed(_) => {
            // The recognizer has already logged the reason
            discard(temp);
            return Err(ApiError::Internal(ERROR_DURING_PREDICTION.to_string()));
        }
        Outcome::NoModel => {
            discard(temp);
            let summary = summarize(&state, Prediction::from(Outcome::NoModel));
            tracing::warn!("Detection skipped: no recognition model loaded");
            return Ok(Json(summary).into_response());
        }
        found_or_empty => Prediction::from(found_or_empty),
    };

    let summary = summarize(&state, prediction.clone());
    tracing::info!(
        "Prediction result: {}, confidence: {:.2}%",
        summary.disease,
        summary.confidence
    );

    match state.config.detection_policy {
        DetectionPolicy::Ephemeral => {
            discard(temp);
            Ok(Json(summary).into_response())
        }
        DetectionPolicy::Persist => {
            let store = state.store.clone();
            let media_root = state.config.media_root.clone();
            let file_name = upload.file_name;
            let detection = NewDetection {
                detected_disease: summary.disease.clone(),
                confidence: prediction.confidence as f64,
                treatment: summary.treatment.clone(),
            };

            let saved = tokio::task::spawn_blocking(move || -> Result<DiseaseDetection, StoreError> {
                let staged = media::stage_detection_image(&media_root, temp.path());
                discard(temp);
                let staged = staged?;

                let saved = store.record_detection(&user, &detection, |id| {
                    media::promote_staged_image(&media_root, &staged, id, file_name.as_deref())
                });
                if saved.is_err() {
                    media::discard_image(&staged);
                }
                saved
            })
            .await
            .map_err(join_error)?;

            match saved {
                Ok(record) => Ok((StatusCode::CREATED, Json(DetectionRecordView::from(record))).into_response()),
                Err(e) => {
                    tracing::error!("Failed to save detection: {}", e);
                    Err(ApiError::Persistence {
                        message: format!("Failed to save detection: {}", e),
                        computed: serde_json::to_value(&summary).ok(),
                    })
                }
            }
        }
    }
}

/// Run the recognizer off the async runtime, bounded by the configured timeout
async fn recognize(state: &AppState, image_path: PathBuf) -> Result<Outcome, ApiError> {
    let recognizer = state.recognizer.clone();
    let task = tokio::task::spawn_blocking(move || recognizer.recognize(&image_path));

    match tokio::time::timeout(state.config.inference_timeout, task).await {
        Ok(joined) => joined.map_err(join_error),
        Err(_) => {
            tracing::error!(
                "Prediction timed out after {:?}",
                state.config.inference_timeout
            );
            Err(ApiError::Internal("Prediction timed out".to_string()))
        }
    }
}

fn summarize(state: &AppState, prediction: Prediction) -> DetectionSummary {
    let disease = canonical_label(&prediction.label).to_string();
    let treatment = state.catalog.treatment_for(&disease).to_string();
    DetectionSummary {
        disease,
        confidence: as_percentage(prediction.confidence as f64),
        treatment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_percentage_rounding() {
        assert_relative_eq!(as_percentage(0.87654), 87.65);
        assert_relative_eq!(as_percentage(0.9f32 as f64), 90.0);
        assert_relative_eq!(as_percentage(0.0), 0.0);
        assert_relative_eq!(as_percentage(1.0), 100.0);
        assert_relative_eq!(as_percentage(1.5), 100.0);
        assert_relative_eq!(as_percentage(f64::NAN), 0.0);
    }

    #[test]
    fn test_record_view_shape() {
        let view = DetectionRecordView::from(DiseaseDetection {
            id: 4,
            user_id: 1,
            username: "alice".to_string(),
            image: "plant_disease_images/4_leaf.jpg".to_string(),
            detected_disease: "Peach___healthy".to_string(),
            confidence: 0.5,
            treatment: "none".to_string(),
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        });
        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["id"], 4);
        assert_eq!(json["disease"], "Peach___healthy");
        assert_eq!(json["confidence"], 50.0);
        assert_eq!(json["image_url"], "/media/plant_disease_images/4_leaf.jpg");
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn test_temp_upload_removed_on_discard() {
        let dir = tempfile::TempDir::new().unwrap();
        let temp = write_temp(&dir.path().join("tmp"), b"bytes").unwrap();
        let path = temp.path().to_path_buf();
        assert!(path.exists());
        discard(temp);
        assert!(!path.exists());
    }
}
