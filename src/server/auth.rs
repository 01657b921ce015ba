//! Caller authentication.
//!
//! Tokens are read from `Authorization: Bearer <token>` first, then from the
//! `token` query parameter (browsers cannot set headers on WebSocket
//! upgrades). The identity directory decides whether the token is valid.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use crate::core::errors::VoxError;
use crate::identity::directory::UserProfile;
use crate::server::error::ApiError;
use crate::server::state::AppState;

/// Authenticated caller.
#[derive(Clone, Debug)]
pub struct AuthUser(pub UserProfile);

/// Extract the raw token from the request.
#[must_use]
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = header {
        return Some(token.to_string());
    }

    parts.uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    })
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts).ok_or(VoxError::Unauthorized)?;
        let Some(user_id) = state.directory.resolve_token(token).await? else {
            debug!("token rejected");
            return Err(VoxError::Unauthorized.into());
        };
        let profile = state
            .directory
            .profile(user_id)
            .await?
            .ok_or(VoxError::Unauthorized)?;
        Ok(Self(profile))
    }
}
