//! Header translation between HTTP clients and the upstream peer.
//!
//! Client headers travel to the peer as a plain string map without the
//! hop-by-hop set. Upstream response headers come back the same way and
//! lose the transport headers before reaching the client, because the
//! relay re-frames the body itself.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

fn is_transport(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || HOP_BY_HOP
            .iter()
            .any(|h| h.as_str().eq_ignore_ascii_case(name))
}

/// Drop hop-by-hop headers and `content-length` from an upstream header map.
pub fn strip_transport_headers(headers: &mut BTreeMap<String, String>) {
    headers.retain(|name, _| !is_transport(name));
}

/// Convert upstream headers for the client, skipping transport and malformed entries.
#[must_use]
pub fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_transport(name) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::debug!(header = %name, "dropping malformed upstream header"),
        }
    }
    map
}

/// Client headers to forward to the peer: everything except hop-by-hop,
/// `host`, and `content-length`. Non-UTF-8 values are skipped.
#[must_use]
pub fn upstream_request_headers(original: &HeaderMap) -> BTreeMap<String, String> {
    original
        .iter()
        .filter(|(name, _)| name.as_str() != "host" && !is_transport(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_headers_skip_hop_by_hop_and_host() {
        let mut original = HeaderMap::new();
        original.insert("host", HeaderValue::from_static("relay.local"));
        original.insert("connection", HeaderValue::from_static("keep-alive"));
        original.insert("content-length", HeaderValue::from_static("42"));
        original.insert("content-type", HeaderValue::from_static("application/json"));
        original.insert("x-goog-api-client", HeaderValue::from_static("genai-js"));

        let forwarded = upstream_request_headers(&original);
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded["content-type"], "application/json");
        assert_eq!(forwarded["x-goog-api-client"], "genai-js");
    }

    #[test]
    fn strip_is_case_insensitive() {
        let mut headers = BTreeMap::from([
            ("Content-Length".to_string(), "10".to_string()),
            ("Transfer-Encoding".to_string(), "chunked".to_string()),
            ("Content-Type".to_string(), "text/plain".to_string()),
        ]);
        strip_transport_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("Content-Type"));
    }

    #[test]
    fn header_map_drops_malformed_entries() {
        let headers = BTreeMap::from([
            ("bad header".to_string(), "x".to_string()),
            ("x-ok".to_string(), "yes".to_string()),
            ("x-newline".to_string(), "a\nb".to_string()),
            ("connection".to_string(), "close".to_string()),
        ]);
        let map = to_header_map(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map["x-ok"], "yes");
    }
}
