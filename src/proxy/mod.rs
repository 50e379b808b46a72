//! Relay of client HTTP requests to the upstream peer.
//!
//! [`forward_handler`] is the Axum fallback for every request that is not
//! served locally. It assigns a fresh correlation id, spawns the relay
//! task ([`relay`]) and streams whatever that task writes back to the
//! client. Submodules handle streaming-mode selection ([`routing`]),
//! header translation ([`headers`]), SSE framing ([`sse`]), status
//! correction ([`status`]) and the response channel ([`writer`]).

pub mod headers;
pub mod relay;
pub mod routing;
pub mod sse;
pub mod status;
pub mod writer;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::server::AppState;

/// Query parameter carrying the client API key. Never forwarded upstream.
pub const KEY_PARAM: &str = "key";

/// JSON error body used for every locally generated failure.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
            "type": "proxy_error",
        }
    });
    (status, Json(body)).into_response()
}

/// Decoded query parameters without the API key.
#[must_use]
pub fn forwarded_query(uri: &Uri) -> BTreeMap<String, String> {
    uri.query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .filter(|(k, _)| k != KEY_PARAM)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

pub async fn forward_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    req_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let request = relay::RelayRequest {
        correlation_id: correlation_id.clone(),
        method,
        path: uri.path().to_string(),
        query: forwarded_query(&uri),
        headers: req_headers,
        body,
    };

    let (writer, pending) = writer::channel(&correlation_id);
    tokio::spawn(relay::relay(state, request, writer));
    pending.into_response().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_drops_key_and_decodes() {
        let uri: Uri = "/v1beta/models?key=secret&pageSize=10&alt=s%20e".parse().unwrap();
        let query = forwarded_query(&uri);
        assert_eq!(query.len(), 2);
        assert_eq!(query["pageSize"], "10");
        assert_eq!(query["alt"], "s e");
    }

    #[tokio::test]
    async fn error_response_shape() {
        let response = error_response(StatusCode::GATEWAY_TIMEOUT, "timed out");
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], 504);
        assert_eq!(json["error"]["type"], "proxy_error");
    }
}
