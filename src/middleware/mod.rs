//! API-key admission for the relayed surface.
//!
//! When `auth.api_keys` is empty every request is admitted. Otherwise the
//! key is read from `x-goog-api-key`, `Authorization: Bearer`, `x-api-key`
//! or the `key` query parameter, in that order.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::Response;

use crate::proxy::{error_response, KEY_PARAM};
use crate::server::AppState;

/// The client key presented by a request, if any.
#[must_use]
pub fn presented_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    header("x-goog-api-key")
        .or_else(|| {
            header("authorization").and_then(|v| {
                v.strip_prefix("Bearer ")
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty())
            })
        })
        .or_else(|| header("x-api-key"))
        .or_else(|| {
            uri.query().and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(k, _)| k == KEY_PARAM)
                    .map(|(_, v)| v.into_owned())
                    .filter(|v| !v.is_empty())
            })
        })
}

pub async fn api_key_guard(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let config = state.current_config().await;
    if config.auth.api_keys.is_empty() {
        return next.run(request).await;
    }

    match presented_key(request.headers(), request.uri()) {
        Some(key) if config.auth.api_keys.iter().any(|k| *k == key) => next.run(request).await,
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "rejected request with invalid API key");
            error_response(StatusCode::UNAUTHORIZED, "invalid API key")
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "rejected request without API key");
            error_response(StatusCode::UNAUTHORIZED, "missing API key")
        }
    }
}
