//! Soil sample request body
//!
//! Accepts a JSON object or an urlencoded form. Every field is optional and
//! defaults to 0; present fields must be numbers or numeric strings. All
//! field problems are reported together.

use std::collections::{BTreeMap, HashMap};

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Form;
use serde_json::{Map, Value};

use crate::crop::{SoilSample, FEATURE_COUNT};
use crate::error::ApiError;

const INVALID_NUMBER: &str = "A valid number is required.";

/// A fully populated soil sample taken from the request body
#[derive(Debug, Clone, Copy)]
pub struct SoilInput(pub SoilSample);

#[axum::async_trait]
impl<S> FromRequest<S> for SoilInput
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.starts_with("application/x-www-form-urlencoded"));

        let fields = if is_form {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            fields
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect()
        } else {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            json_fields(&body)?
        };

        parse_sample(&fields).map(SoilInput)
    }
}

fn json_fields(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ApiError::BadRequest("Expected a JSON object".to_string())),
        Err(e) => Err(ApiError::BadRequest(format!("Malformed JSON: {}", e))),
    }
}

/// Coerce the seven fields, defaulting missing ones to 0
pub fn parse_sample(fields: &Map<String, Value>) -> Result<SoilSample, ApiError> {
    let mut values = [0.0; FEATURE_COUNT];
    let mut errors = BTreeMap::new();

    for (slot, name) in values.iter_mut().zip(SoilSample::FIELDS) {
        match fields.get(name).map(coerce).unwrap_or(Some(0.0)) {
            Some(v) => *slot = v,
            None => {
                errors.insert(name.to_string(), INVALID_NUMBER.to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(SoilSample::from_features(values))
    } else {
        Err(ApiError::InvalidFields(errors))
    }
}

fn coerce(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Null => Some(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    };
    number.filter(|v| v.is_finite())
}
