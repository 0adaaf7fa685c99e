//! `CurrentUser` extractor for protected handlers
//!
//! Missing header → 401 `NotAuthenticated`; anything unreadable or expired →
//! 401 `TokenInvalid` / `TokenExpired`. Role checks happen in the engine.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::AppError;
use crate::auth::{CurrentUser, JwtError, JwtService};
use crate::core::ServerState;
use crate::security_log;

/// Bearer token of the request, `Ok(None)` when there is no header at all
fn bearer_token(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(value) = parts.headers.get(http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(JwtService::extract_from_header)
        .map(Some)
        .ok_or_else(|| AppError::invalid_token("Invalid authorization header"))
}

impl FromRequestParts<ServerState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let Some(token) = bearer_token(parts)? else {
            security_log!("WARN", "auth_missing", uri = parts.uri.to_string());
            return Err(AppError::unauthorized());
        };

        let claims = state.get_jwt_service().validate_token(token).map_err(|e| {
            security_log!(
                "WARN",
                "auth_failed",
                error = e.to_string(),
                uri = parts.uri.to_string()
            );
            match e {
                JwtError::ExpiredToken => AppError::token_expired(),
                _ => AppError::invalid_token("Invalid token"),
            }
        })?;

        let user = CurrentUser::from(claims);
        tracing::debug!(user_id = %user.id, role = %user.role, "Request authenticated");
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
