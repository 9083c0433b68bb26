//! `CLIENT_API_KEY` bearer check (spec §6, §7). Replaces the teacher's
//! OAuth/JWT layer (`crates/server/src/auth/`) — this bridge authenticates
//! clients with a single shared secret, not per-user tokens.

use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};

use proxy::error::ProxyError;

use crate::AppState;

/// Extracts a client-presented key from `Authorization: Bearer ...` or
/// `x-api-key`, in that order.
pub fn extract_client_key(headers: &HeaderMap) -> Option<SecretString> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(SecretString::from(token.to_string()));
    }

    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(|s| SecretString::from(s.to_string()))
}

/// Rejects the request with 401 when `CLIENT_API_KEY` is configured and the
/// caller's key doesn't match. No-op (open) when it isn't set.
pub async fn require_client_api_key(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Some(expected) = &state.config.server.client_api_key else {
        return next.run(req).await;
    };

    match extract_client_key(req.headers()) {
        Some(provided) if provided.expose_secret() == expected.expose_secret() => next.run(req).await,
        _ => ProxyError::AuthenticationFailed.into_response(),
    }
}
