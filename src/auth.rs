use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const SUPABASE_AUDIENCE: &str = "authenticated";

#[derive(Debug, Deserialize)]
struct SupabaseClaims {
    sub: String,
}

/// Resolve the calling user id from the request headers.
///
/// Order: dev override header (non-production only), local HS256 check
/// against `SUPABASE_JWT_SECRET`, then the Supabase `/auth/v1/user` endpoint.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_value(headers, "x-user-id") {
            return Ok(user_id);
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return decode_user_id(token, secret);
    }
    fetch_supabase_user_id(state, token).await
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn decode_user_id(token: &str, secret: &str) -> AppResult<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[SUPABASE_AUDIENCE]);

    let data = decode::<SupabaseClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(%error, "JWT rejected");
        AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
    })?;

    let user_id = data.claims.sub.trim();
    if user_id.is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: token has no subject.".to_string(),
        ));
    }
    Ok(user_id.to_string())
}

async fn fetch_supabase_user_id(state: &AppState, token: &str) -> AppResult<String> {
    let base_url = state.config.supabase_url.as_deref().ok_or_else(|| {
        AppError::Dependency(
            "Authentication is not configured. Set SUPABASE_JWT_SECRET or SUPABASE_URL."
                .to_string(),
        )
    })?;

    let mut request = state
        .http_client
        .get(format!("{}/auth/v1/user", base_url.trim_end_matches('/')))
        .bearer_auth(token);
    if let Some(service_key) = state.config.supabase_service_role_key.as_deref() {
        request = request.header("apikey", service_key);
    }

    let response = request
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth request failed: {error}")))?;
    match response.status() {
        status if status.is_success() => {}
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(AppError::Unauthorized(
                "Unauthorized: invalid or expired token.".to_string(),
            ));
        }
        status => {
            return Err(AppError::Dependency(format!(
                "Supabase auth returned {status}."
            )));
        }
    }

    let body = response
        .json::<Value>()
        .await
        .map_err(|error| AppError::Dependency(format!("Supabase auth response unreadable: {error}")))?;
    body.get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: unknown user.".to_string()))
}
