//! Bearer-token identity
//!
//! `Authorization: Bearer <token>` is resolved against the user table.
//! Resolved users are kept in the state's token cache until its TTL expires.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::api_server::AppState;
use crate::error::ApiError;
use crate::store::User;

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Token from an `Authorization: Bearer ...` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or(ApiError::Unauthorized)?
            .to_string();

        if let Some(user) = state.token_cache.get(&token).await {
            return Ok(AuthUser(user));
        }

        let store = state.store.clone();
        let lookup = token.clone();
        let user = tokio::task::spawn_blocking(move || store.user_by_token(&lookup))
            .await
            .map_err(|e| ApiError::Internal(format!("Authentication task failed: {}", e)))?
            .map_err(|e| ApiError::Internal(format!("Authentication lookup failed: {}", e)))?;

        match user {
            Some(user) => {
                state.token_cache.insert(token, user.clone()).await;
                Ok(AuthUser(user))
            }
            None => {
                tracing::debug!("Rejected unknown API token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}
