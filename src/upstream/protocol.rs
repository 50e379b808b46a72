//! JSON wire format spoken with the upstream peer.
//!
//! Outbound, every relayed call becomes one [`ProxyRequest`] text frame,
//! and account switches travel as a [`SwitchAccount`] control frame.
//! Inbound frames are decoded into an [`Inbound`] value that names the
//! request it belongs to and the [`UpstreamEvent`] it carries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::model::StreamingMode;

/// Request forwarded to the peer for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub path: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub request_id: String,
    pub streaming_mode: StreamingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ProxyRequest {
    /// GET and HEAD never carry a body on the wire.
    #[must_use]
    pub fn method_allows_body(method: &str) -> bool {
        !method.eq_ignore_ascii_case("GET") && !method.eq_ignore_ascii_case("HEAD")
    }
}

/// Control frame instructing the peer to re-establish its session under another account.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchAccount<'a> {
    pub event_type: &'static str,
    pub auth_index: u32,
    pub credential: &'a Value,
}

impl<'a> SwitchAccount<'a> {
    #[must_use]
    pub const fn new(auth_index: u32, credential: &'a Value) -> Self {
        Self {
            event_type: "switch_account",
            auth_index,
            credential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    ResponseHeaders {
        status: u16,
        headers: BTreeMap<String, String>,
    },
    Chunk {
        data: String,
    },
    Error {
        status: Option<u16>,
        message: String,
    },
    StreamEnd,
}

impl UpstreamEvent {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ResponseHeaders { .. } => "response_headers",
            Self::Chunk { .. } => "chunk",
            Self::Error { .. } => "error",
            Self::StreamEnd => "stream_close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An event addressed to a pending request.
    Routed {
        request_id: String,
        event: UpstreamEvent,
    },
    /// Addressed, but with an `event_type` this relay does not understand.
    Unrecognized {
        request_id: String,
        event_type: String,
    },
    /// No `request_id`; nothing to route to.
    Unaddressed,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    headers: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<Inbound, serde_json::Error> {
    let wire: WireEvent = serde_json::from_str(text)?;

    let Some(request_id) = wire.request_id.filter(|id| !id.is_empty()) else {
        return Ok(Inbound::Unaddressed);
    };

    let event = match wire.event_type.as_deref() {
        Some("response_headers") => UpstreamEvent::ResponseHeaders {
            status: wire.status.unwrap_or(200),
            headers: wire
                .headers
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, value_to_text(v)))
                .collect(),
        },
        Some("chunk") | None => UpstreamEvent::Chunk {
            data: wire.data.map(value_to_text).unwrap_or_default(),
        },
        Some("error") => UpstreamEvent::Error {
            status: wire.status,
            message: wire.message.unwrap_or_else(|| "unknown upstream error".into()),
        },
        Some("stream_close") => UpstreamEvent::StreamEnd,
        Some(other) => {
            return Ok(Inbound::Unrecognized {
                request_id,
                event_type: other.to_string(),
            })
        }
    };

    Ok(Inbound::Routed { request_id, event })
}
