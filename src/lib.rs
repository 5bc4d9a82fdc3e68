//! Farm Help backend
//!
//! Crop and fertilizer recommendation plus plant disease recognition, served
//! over HTTP with per-user history in SQLite.
//!
//! - `crop/`: crop classifier and fertilizer rules
//! - `disease/`: disease recognizer, model loaders and treatment advice
//! - `store/`: SQLite persistence
//! - `web/`: extractors and endpoint handlers
//! - `password`: salted password hashes for registered accounts
//! - `api_server`: application state and router

pub mod api_server;
pub mod config;
pub mod crop;
pub mod disease;
pub mod error;
pub mod media;
pub mod password;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use api_server::{create_router, AppState};
pub use config::{AppConfig, DetectionPolicy};
pub use crop::{recommend_fertilizer, CropPredictor, SoilSample};
pub use disease::{DiseaseRecognizer, Outcome, Prediction, TreatmentCatalog};
pub use error::{ApiError, StoreError};
pub use store::Store;
