// Axum API server: application state, router and health check

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::config::AppConfig;
use crate::crop::CropPredictor;
use crate::disease::{DiseaseRecognizer, RecognizerPaths, TreatmentCatalog};
use crate::media::MEDIA_URL;
use crate::store::{Store, User};
use crate::web::handlers::{crop, history, pest, users};

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
    pub crop_predictor: Arc<CropPredictor>,
    pub recognizer: Arc<DiseaseRecognizer>,
    pub catalog: Arc<TreatmentCatalog>,
    /// Bearer token -> user, refreshed from the store after the TTL
    pub token_cache: Cache<String, User>,
}

impl AppState {
    /// Build everything from configuration. Crop model problems abort startup;
    /// recognizer problems only put it in simulation mode.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        config
            .ensure_directories()
            .context("creating media and data directories")?;

        tracing::info!("Opening database...");
        let store = Store::open(&config.database_path)
            .with_context(|| format!("opening database {}", config.database_path.display()))?;

        tracing::info!("Loading crop model...");
        let crop_predictor = CropPredictor::load(&config.crop_model_path)
            .with_context(|| format!("loading crop model {}", config.crop_model_path.display()))?;

        tracing::info!("Loading disease recognizer...");
        let paths = RecognizerPaths::from_config(&config);
        let recognizer = tokio::task::spawn_blocking(move || DiseaseRecognizer::load(&paths))
            .await
            .context("recognizer loading task failed")?;
        tracing::info!(
            "Disease recognizer ready ({})",
            recognizer.strategy().unwrap_or("simulation")
        );

        Ok(Self::from_parts(config, store, crop_predictor, recognizer))
    }

    /// Assemble state from already constructed components
    pub fn from_parts(
        config: AppConfig,
        store: Store,
        crop_predictor: CropPredictor,
        recognizer: DiseaseRecognizer,
    ) -> Self {
        let token_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(config.token_cache_ttl)
            .build();

        Self {
            catalog: Arc::new(TreatmentCatalog::new(config.healthy_advice)),
            config: Arc::new(config),
            store: Arc::new(store),
            crop_predictor: Arc::new(crop_predictor),
            recognizer: Arc::new(recognizer),
            token_cache,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    let media = ServeDir::new(&state.config.media_root);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Accounts
        .route("/users/register/", post(users::register))
        .route("/users/token/", post(users::issue_token))
        .route("/users/profile/", get(users::profile).put(users::update_profile))

        // Crop prediction
        .route("/predict-crop/", post(crop::predict_crop))
        .route("/api/predict-crop/", post(crop::predict_crop))

        // Disease detection
        .route("/detect-pest/", post(pest::detect_pest))
        .route("/api/detect/", post(pest::detect_pest))
        .route("/api/detect-pest/", post(pest::detect_pest))

        // History
        .route("/prediction-history/", get(history::prediction_history))
        .route("/api/prediction-history/", get(history::prediction_history))
        .route("/recommendations/", get(history::crop_recommendations))
        .route("/api/history/", get(history::detection_history))

        // Stored detection images
        .nest_service(MEDIA_URL, media)

        // Middleware (applied in reverse order)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "recognizer": state.recognizer.strategy().unwrap_or("simulation"),
    }))
}
