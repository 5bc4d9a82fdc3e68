//! Environment-driven configuration
//!
//! Every setting has a local-development default; deployments override
//! through environment variables (set via systemd or the container).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Whether disease detections are written to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPolicy {
    /// Store image + record, respond 201 with the record
    Persist,
    /// Skip storage, respond 200 with an ephemeral payload; pest history is empty
    Ephemeral,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub media_root: PathBuf,
    pub upload_tmp_dir: PathBuf,
    pub crop_model_path: PathBuf,
    pub detector_weights: PathBuf,
    pub detector_reference_dir: PathBuf,
    pub legacy_model_path: PathBuf,
    pub detection_policy: DetectionPolicy,
    pub healthy_advice: bool,
    pub inference_timeout: Duration,
    pub max_upload_bytes: usize,
    pub token_cache_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let media_root = PathBuf::from("media");
        Self {
            port: 8000,
            database_path: PathBuf::from("data/farm_help.db"),
            upload_tmp_dir: media_root.join("tmp"),
            media_root,
            crop_model_path: PathBuf::from("ml_models/crop_model.json"),
            detector_weights: PathBuf::from("ml_models/best.onnx"),
            detector_reference_dir: PathBuf::from("ml_models/yolov5"),
            legacy_model_path: PathBuf::from("ml_models/plant_disease_model.onnx"),
            detection_policy: DetectionPolicy::Persist,
            healthy_advice: true,
            inference_timeout: Duration::from_secs(30),
            max_upload_bytes: 10 * 1024 * 1024,
            token_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PORT") {
            config.port = parse_value("PORT", &v)?;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MEDIA_ROOT") {
            config.media_root = PathBuf::from(v);
            config.upload_tmp_dir = config.media_root.join("tmp");
        }
        if let Some(v) = lookup("UPLOAD_TMP_DIR") {
            config.upload_tmp_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CROP_MODEL_PATH") {
            config.crop_model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DETECTOR_WEIGHTS") {
            config.detector_weights = PathBuf::from(v);
        }
        if let Some(v) = lookup("DETECTOR_REFERENCE_DIR") {
            config.detector_reference_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LEGACY_MODEL_PATH") {
            config.legacy_model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PERSIST_DETECTIONS") {
            config.detection_policy = if parse_bool("PERSIST_DETECTIONS", &v)? {
                DetectionPolicy::Persist
            } else {
                DetectionPolicy::Ephemeral
            };
        }
        if let Some(v) = lookup("HEALTHY_ADVICE") {
            config.healthy_advice = parse_bool("HEALTHY_ADVICE", &v)?;
        }
        if let Some(v) = lookup("INFERENCE_TIMEOUT_SECS") {
            config.inference_timeout = Duration::from_secs(parse_value("INFERENCE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = lookup("TOKEN_CACHE_TTL_SECS") {
            config.token_cache_ttl = Duration::from_secs(parse_value("TOKEN_CACHE_TTL_SECS", &v)?);
        }

        Ok(config)
    }

    /// Directory holding stored detection images
    pub fn detection_image_dir(&self) -> PathBuf {
        self.media_root.join(crate::media::DETECTION_IMAGE_DIR)
    }

    /// Create the media root, the detection image directory and the upload scratch directory
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.media_root.clone(),
            self.detection_image_dir(),
            self.upload_tmp_dir.clone(),
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                tracing::info!("Created directory: {}", dir.display());
            }
        }
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.detection_policy, DetectionPolicy::Persist);
        assert!(config.healthy_advice);
        assert_eq!(config.upload_tmp_dir, PathBuf::from("media/tmp"));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "9100"),
            ("MEDIA_ROOT", "/srv/media"),
            ("PERSIST_DETECTIONS", "false"),
            ("INFERENCE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.upload_tmp_dir, PathBuf::from("/srv/media/tmp"));
        assert_eq!(config.detection_image_dir(), PathBuf::from("/srv/media/plant_disease_images"));
        assert_eq!(config.detection_policy, DetectionPolicy::Ephemeral);
        assert_eq!(config.inference_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("HEALTHY_ADVICE", "maybe")])).is_err());
    }
}
