use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, state::AppState};

/// Reject requests whose `Host` is not in `TRUSTED_HOSTS` (`*` allows all).
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if is_trusted_host(&state.config.trusted_hosts, host) {
        return next.run(request).await;
    }
    tracing::warn!(host, "Rejected request for untrusted host");
    AppError::BadRequest("Invalid host header.".to_string()).into_response()
}

fn is_trusted_host(trusted: &[String], host: &str) -> bool {
    let hostname = host
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|character| character.is_ascii_digit()))
        .map_or(host, |(name, _)| name)
        .trim()
        .to_ascii_lowercase();

    trusted.iter().any(|candidate| {
        let candidate = candidate.trim().to_ascii_lowercase();
        candidate == "*"
            || candidate == hostname
            || candidate
                .strip_prefix("*.")
                .is_some_and(|suffix| hostname.ends_with(&format!(".{suffix}")))
    })
}
