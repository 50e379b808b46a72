//! Server-sent-event framing for relayed streams.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue};

pub const DONE: &str = "data: [DONE]\n\n";

/// Streaming endpoints are recognized by the `:stream` marker in the path,
/// as in `models/gemini-pro:streamGenerateContent`.
#[must_use]
pub fn is_streaming_path(path: &str) -> bool {
    path.contains(":stream")
}

#[must_use]
pub fn data_event(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

#[must_use]
pub fn done_event() -> Bytes {
    Bytes::from_static(DONE.as_bytes())
}

/// Inert chunk shaped so each client family parses it without side effects.
#[must_use]
pub fn keep_alive_chunk(path: &str) -> Bytes {
    let payload = if path.contains("chat/completions") {
        serde_json::json!({
            "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            "object": "chat.completion.chunk",
            "created": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
            "model": "relay-keepalive",
            "choices": [{"index": 0, "delta": {}, "finish_reason": null}],
        })
    } else if path.contains("generateContent") || path.contains("streamGenerateContent") {
        serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": ""}], "role": "model"},
                "finishReason": null,
                "index": 0,
                "safetyRatings": [],
            }],
        })
    } else {
        serde_json::json!({})
    };
    data_event(&payload.to_string())
}

/// In-band error notice for clients that already received a 200 stream head.
#[must_use]
pub fn notice_event(message: &str) -> Bytes {
    let payload = serde_json::json!({
        "error": {
            "message": format!("[relay] {message}"),
            "type": "proxy_error",
            "code": "proxy_error",
        }
    });
    data_event(&payload.to_string())
}

#[must_use]
pub fn stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(chunk: &Bytes) -> serde_json::Value {
        let text = std::str::from_utf8(chunk).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|t| t.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn streaming_paths() {
        assert!(is_streaming_path("/v1beta/models/gemini-pro:streamGenerateContent"));
        assert!(!is_streaming_path("/v1beta/models/gemini-pro:generateContent"));
    }

    #[test]
    fn keep_alive_matches_endpoint_family() {
        let openai = payload(&keep_alive_chunk("/v1/chat/completions"));
        assert_eq!(openai["object"], "chat.completion.chunk");

        let gemini = payload(&keep_alive_chunk("/v1beta/models/x:streamGenerateContent"));
        assert_eq!(gemini["candidates"][0]["content"]["parts"][0]["text"], "");

        assert_eq!(payload(&keep_alive_chunk("/v1beta/files")), serde_json::json!({}));
    }

    #[test]
    fn notices_are_proxy_errors() {
        let notice = payload(&notice_event("retrying"));
        assert_eq!(notice["error"]["type"], "proxy_error");
        assert_eq!(notice["error"]["message"], "[relay] retrying");
    }

    #[test]
    fn done_marker_terminates_stream() {
        assert_eq!(&done_event()[..], b"data: [DONE]\n\n");
    }
}
