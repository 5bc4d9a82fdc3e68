// Account endpoints: registration, token issue and profile

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api_server::AppState;
use crate::error::{ApiError, StoreError};
use crate::password;
use crate::store::{NewUser, ProfileUpdate, User};
use crate::web::auth::AuthUser;

const REQUIRED: &str = "This field is required.";
const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 150;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub farm_location: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|e| ApiError::Rejected {
        status: e.status(),
        message: e.body_text(),
    })
}

fn valid_username(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Check a registration and turn it into account fields (password still in clear)
pub fn validate_registration(req: RegisterRequest) -> Result<(NewUser, String), ApiError> {
    let mut errors = BTreeMap::new();

    let username = req.username.unwrap_or_default().trim().to_string();
    if username.is_empty() {
        errors.insert("username".to_string(), REQUIRED.to_string());
    } else if username.chars().count() > MAX_USERNAME_LEN || !valid_username(&username) {
        errors.insert(
            "username".to_string(),
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                .to_string(),
        );
    }

    let email = req.email.unwrap_or_default().trim().to_string();
    if email.is_empty() {
        errors.insert("email".to_string(), REQUIRED.to_string());
    } else if !valid_email(&email) {
        errors.insert("email".to_string(), "Enter a valid email address.".to_string());
    }

    let password = req.password.unwrap_or_default();
    if password.is_empty() {
        errors.insert("password".to_string(), REQUIRED.to_string());
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.insert(
            "password".to_string(),
            format!("Ensure this field has at least {} characters.", MIN_PASSWORD_LEN),
        );
    }

    if !errors.is_empty() {
        return Err(ApiError::InvalidFields(errors));
    }

    let new_user = NewUser {
        username,
        email,
        farm_location: req.farm_location.unwrap_or_default().trim().to_string(),
        phone: req.phone.unwrap_or_default().trim().to_string(),
        password_hash: String::new(),
    };
    Ok((new_user, password))
}

/// POST /users/register/
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (mut new_user, password) = validate_registration(json_body(body)?)?;

    let store = state.store.clone();
    let created = tokio::task::spawn_blocking(move || {
        new_user.password_hash = password::hash_password(&password);
        let token = uuid::Uuid::new_v4().simple().to_string();
        store.register_user(&new_user, &token)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Registration task failed: {}", e)))?;

    match created {
        Ok(user) => Ok((
            StatusCode::CREATED,
            Json(json!({ "message": "User registered successfully", "user": user })),
        )),
        Err(StoreError::Duplicate(_)) => {
            let mut errors = BTreeMap::new();
            errors.insert(
                "username".to_string(),
                "A user with that username already exists.".to_string(),
            );
            Err(ApiError::InvalidFields(errors))
        }
        Err(e) => {
            tracing::error!("Failed to register user: {}", e);
            Err(ApiError::Internal(format!("Failed to register user: {}", e)))
        }
    }
}

/// POST /users/token/
///
/// Exchange a username and password for the account's bearer token.
pub async fn issue_token(
    State(state): State<AppState>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;
    let username = req.username.unwrap_or_default().trim().to_string();
    let password = req.password.unwrap_or_default();

    let mut errors = BTreeMap::new();
    if username.is_empty() {
        errors.insert("username".to_string(), REQUIRED.to_string());
    }
    if password.is_empty() {
        errors.insert("password".to_string(), REQUIRED.to_string());
    }
    if !errors.is_empty() {
        return Err(ApiError::InvalidFields(errors));
    }

    let store = state.store.clone();
    let checked = tokio::task::spawn_blocking(move || -> Result<Option<User>, StoreError> {
        let found = store.user_with_password(&username)?;
        Ok(found
            .filter(|(_, hash)| password::verify_password(&password, hash))
            .map(|(user, _)| user))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Login task failed: {}", e)))?
    .map_err(|e| ApiError::Internal(format!("Login lookup failed: {}", e)))?;

    match checked {
        Some(user) => {
            tracing::info!("Issued token to {}", user.username);
            Ok(Json(json!({ "access": user.api_token, "token_type": "Bearer" })))
        }
        None => {
            tracing::debug!("Rejected login attempt");
            Err(ApiError::InvalidCredentials)
        }
    }
}

/// GET /users/profile/
pub async fn profile(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// PUT /users/profile/
///
/// Partial update of email, farm location and phone. Other fields are ignored.
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let mut update = json_body(body)?;
    if let Some(email) = update.email.as_mut() {
        *email = email.trim().to_string();
        if !valid_email(email) {
            let mut errors = BTreeMap::new();
            errors.insert("email".to_string(), "Enter a valid email address.".to_string());
            return Err(ApiError::InvalidFields(errors));
        }
    }

    let store = state.store.clone();
    let user_id = user.id;
    let updated = tokio::task::spawn_blocking(move || store.update_profile(user_id, &update))
        .await
        .map_err(|e| ApiError::Internal(format!("Profile task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("Failed to update profile: {}", e)))?;

    // The cached copy behind this token is now stale
    state.token_cache.invalidate(&user.api_token).await;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: Some(username.to_string()),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            ..RegisterRequest::default()
        }
    }

    fn field_errors(result: Result<(NewUser, String), ApiError>) -> BTreeMap<String, String> {
        match result {
            Err(ApiError::InvalidFields(errors)) => errors,
            other => panic!("expected field errors, got {:?}", other.map(|(u, _)| u.username)),
        }
    }

    #[test]
    fn test_valid_registration() {
        let mut req = request(" farmer ", "farmer@example.com", "long enough");
        req.farm_location = Some("Kisumu ".to_string());
        let (user, password) = validate_registration(req).unwrap();
        assert_eq!(user.username, "farmer");
        assert_eq!(user.farm_location, "Kisumu");
        assert_eq!(user.phone, "");
        assert_eq!(password, "long enough");
    }

    #[test]
    fn test_missing_fields_reported_together() {
        let errors = field_errors(validate_registration(RegisterRequest::default()));
        assert_eq!(errors.len(), 3);
        assert_eq!(errors["username"], REQUIRED);
        assert_eq!(errors["email"], REQUIRED);
        assert_eq!(errors["password"], REQUIRED);
    }

    #[test]
    fn test_field_rules() {
        let errors = field_errors(validate_registration(request("two words", "nope", "short")));
        assert!(errors["username"].starts_with("Enter a valid username"));
        assert_eq!(errors["email"], "Enter a valid email address.");
        assert_eq!(errors["password"], "Ensure this field has at least 8 characters.");
    }

    #[test]
    fn test_email_shape() {
        assert!(valid_email("a@b.co"));
        assert!(!valid_email("a@b"));
        assert!(!valid_email("@b.co"));
        assert!(!valid_email("a@.co"));
        assert!(!valid_email("a.b.co"));
    }
}
