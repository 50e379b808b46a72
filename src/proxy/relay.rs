//! Per-request relay engine.
//!
//! One [`relay`] call drives one inbound request to completion: cache
//! lookup, admission, correlation, the retry loop, and delivery in either
//! real-stream or pseudo-stream mode. Every failure ends as an HTTP error
//! response or, once a stream head went out, as an inline notice.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;

use super::routing::resolve_streaming_mode;
use super::status::correct_status;
use super::writer::ResponseWriter;
use super::{headers, sse};
use crate::cache::{cache_key, is_cacheable, CacheEntry};
use crate::config::model::{Config, StreamingMode};
use crate::config::validation::is_error_status;
use crate::error::QueueError;
use crate::rotation::{NoticeSink, UpstreamFailure};
use crate::server::AppState;
use crate::stats::model_from_request;
use crate::upstream::{MessageQueue, ProxyRequest, UpstreamEvent};

/// An inbound request, already stripped of the `key` credential parameter.
#[derive(Debug)]
pub struct RelayRequest {
    pub correlation_id: String,
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
enum RelayFailure {
    Upstream { status: StatusCode, message: String },
    ClientGone,
}

impl RelayFailure {
    fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            message: message.into(),
        }
    }
}

impl From<QueueError> for RelayFailure {
    fn from(e: QueueError) -> Self {
        Self::Upstream {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

/// Everything one exchange with the upstream peer needs.
struct Exchange<'a> {
    state: &'a AppState,
    config: &'a Config,
    correlation_id: &'a str,
    path: &'a str,
    frame: String,
    queue: &'a MessageQueue<UpstreamEvent>,
    writer: &'a ResponseWriter,
    cache_key: Option<String>,
}

/// Wait for the next event, giving up early when the client disconnects.
async fn next_event(
    queue: &MessageQueue<UpstreamEvent>,
    writer: &ResponseWriter,
    timeout: Duration,
) -> Result<Result<UpstreamEvent, QueueError>, RelayFailure> {
    tokio::select! {
        event = queue.dequeue(timeout) => Ok(event),
        () = writer.closed() => Err(RelayFailure::ClientGone),
    }
}

pub async fn relay(state: Arc<AppState>, request: RelayRequest, writer: ResponseWriter) {
    let config = state.current_config().await;
    let RelayRequest {
        correlation_id,
        method,
        path,
        query,
        headers: inbound_headers,
        body,
    } = request;

    let cache_key = state
        .cache
        .as_ref()
        .filter(|_| config.cache.enabled() && is_cacheable(&method, &path))
        .map(|_| cache_key(&method, &path, &query));

    if let (Some(cache), Some(key)) = (state.cache.as_ref(), cache_key.as_deref()) {
        if let Some(entry) = cache.get(key).await {
            state.stats.record_cache_hit();
            let ttl = Duration::from_secs(config.cache.ttl_secs);
            writer
                .respond(
                    entry.status_code(),
                    entry.replay_headers(ttl),
                    Bytes::from(entry.body),
                )
                .await;
            return;
        }
    }

    let model = model_from_request(&path, &body);
    let account = state.rotation.current_index();
    state.stats.record_call(account, &model);

    if config.debug {
        tracing::debug!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            query = ?query,
            headers = ?inbound_headers,
            body = %String::from_utf8_lossy(&body),
            "inbound request detail"
        );
    }

    if !state.registry.has_active_connections() {
        tracing::warn!(correlation_id = %correlation_id, path = %path, "no upstream connection, rejecting request");
        state.stats.record_failure();
        writer
            .fail(
                StatusCode::SERVICE_UNAVAILABLE,
                "no upstream connection available",
            )
            .await;
        return;
    }

    let mode = resolve_streaming_mode(&config.streaming, method.as_str(), &path);
    let message = ProxyRequest {
        path: path.clone(),
        method: method.to_string(),
        headers: headers::upstream_request_headers(&inbound_headers),
        query_params: query,
        request_id: correlation_id.clone(),
        streaming_mode: mode,
        body: ProxyRequest::method_allows_body(method.as_str())
            .then(|| String::from_utf8_lossy(&body).into_owned()),
    };
    let frame = match serde_json::to_string(&message) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(correlation_id = %correlation_id, error = %e, "failed to encode upstream request");
            state.stats.record_failure();
            writer
                .fail(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode upstream request")
                .await;
            return;
        }
    };

    tracing::info!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        mode = %mode,
        account = ?account,
        model = %model,
        "relaying request"
    );

    let lease = state.registry.lease_queue(&correlation_id);
    let exchange = Exchange {
        state: &state,
        config: &config,
        correlation_id: &correlation_id,
        path: &path,
        frame,
        queue: lease.queue(),
        writer: &writer,
        cache_key,
    };

    let outcome = match mode {
        StreamingMode::Real => deliver_real(&exchange).await,
        StreamingMode::Fake => deliver_pseudo(&exchange).await,
    };

    match outcome {
        Ok(()) => tracing::info!(correlation_id = %correlation_id, "request complete"),
        Err(RelayFailure::ClientGone) => {
            tracing::info!(correlation_id = %correlation_id, "client disconnected, abandoning request");
        }
        Err(RelayFailure::Upstream { status, message }) => {
            tracing::warn!(
                correlation_id = %correlation_id,
                status = status.as_u16(),
                error = %message,
                "request failed"
            );
            state.stats.record_failure();
            writer.fail(status, &message).await;
        }
    }
    drop(lease);
}

/// The retry loop. Returns the first non-error event of a successful attempt.
async fn first_event(
    ex: &Exchange<'_>,
    notices: Option<&dyn NoticeSink>,
) -> Result<UpstreamEvent, RelayFailure> {
    let max = ex.config.retry.max_retries.max(1);
    let delay = Duration::from_millis(ex.config.retry.retry_delay_ms);
    let first_response = Duration::from_millis(ex.config.timeouts.first_response_ms);

    for attempt in 1..=max {
        if attempt > 1 {
            // Leftovers from the failed attempt must not pass for this one's reply.
            let stale = ex.queue.discard_buffered();
            if stale > 0 {
                tracing::debug!(correlation_id = %ex.correlation_id, stale, "discarded events from the previous attempt");
            }
        }
        let peer = ex
            .state
            .registry
            .forward(ex.frame.clone(), ex.config.upstream.selection)
            .map_err(|e| RelayFailure::upstream(503, e.to_string()))?;
        tracing::debug!(correlation_id = %ex.correlation_id, attempt, peer, "request forwarded");

        let event = next_event(ex.queue, ex.writer, first_response).await??;
        match event {
            UpstreamEvent::Error {
                status: Some(reported),
                message,
            } if is_error_status(reported) => {
                let status = if ex.config.upstream.status_correction {
                    correct_status(reported, &message)
                } else {
                    reported
                };
                tracing::warn!(
                    correlation_id = %ex.correlation_id,
                    attempt,
                    max_attempts = max,
                    status,
                    "upstream returned an error"
                );
                if ex.config.debug {
                    tracing::debug!(correlation_id = %ex.correlation_id, error = %message, "upstream error detail");
                }

                let failure = UpstreamFailure { status, message };
                let outcome = ex
                    .state
                    .rotation
                    .on_failure(&failure, &ex.config.rotation, notices)
                    .await;
                tracing::debug!(correlation_id = %ex.correlation_id, outcome = ?outcome, "failure handled");

                if attempt == max {
                    return Err(RelayFailure::upstream(status, failure.message));
                }
                if let Some(sink) = notices {
                    sink.notice(&format!(
                        "attempt {attempt}/{max} failed with status {status}, retrying in {}ms",
                        delay.as_millis()
                    ));
                }
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = ex.writer.closed() => return Err(RelayFailure::ClientGone),
                }
            }
            UpstreamEvent::Error { status, message } => {
                tracing::error!(
                    correlation_id = %ex.correlation_id,
                    status = ?status,
                    error = %message,
                    "upstream error without an error status"
                );
                return Err(RelayFailure::upstream(502, message));
            }
            other => {
                ex.state.rotation.record_success();
                return Ok(other);
            }
        }
    }

    Err(RelayFailure::upstream(502, "no upstream attempt was made"))
}

async fn store(ex: &Exchange<'_>, status: u16, headers: BTreeMap<String, String>, body: String) {
    if let (Some(cache), Some(key)) = (ex.state.cache.as_ref(), ex.cache_key.as_deref()) {
        let ttl = Duration::from_secs(ex.config.cache.ttl_secs);
        cache.put(key, &CacheEntry::new(status, headers, body), ttl).await;
    }
}

async fn deliver_real(ex: &Exchange<'_>) -> Result<(), RelayFailure> {
    let first = first_event(ex, None).await?;
    let mut ended = matches!(first, UpstreamEvent::StreamEnd);
    let (status, mut upstream_headers, initial) = match first {
        UpstreamEvent::ResponseHeaders { status, headers } => (status, headers, None),
        UpstreamEvent::Chunk { data } => (200, BTreeMap::new(), Some(data)),
        UpstreamEvent::StreamEnd | UpstreamEvent::Error { .. } => (200, BTreeMap::new(), None),
    };
    headers::strip_transport_headers(&mut upstream_headers);

    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if !ex
        .writer
        .send_head(status_code, headers::to_header_map(&upstream_headers))
        .await
    {
        return Err(RelayFailure::ClientGone);
    }

    let mut collected = ex.cache_key.as_ref().map(|_| String::new());
    let mut forward = |data: String| {
        if let Some(buf) = collected.as_mut() {
            buf.push_str(&data);
        }
        Bytes::from(data)
    };

    if let Some(data) = initial {
        if !ex.writer.write(forward(data)).await {
            return Err(RelayFailure::ClientGone);
        }
    }

    let idle = Duration::from_millis(ex.config.timeouts.stream_idle_ms);
    while !ended {
        match next_event(ex.queue, ex.writer, idle).await? {
            Ok(UpstreamEvent::Chunk { data }) => {
                if !ex.writer.write(forward(data)).await {
                    return Err(RelayFailure::ClientGone);
                }
            }
            Ok(UpstreamEvent::StreamEnd) => ended = true,
            Ok(UpstreamEvent::ResponseHeaders { .. }) => {
                tracing::warn!(correlation_id = %ex.correlation_id, "duplicate response headers ignored");
            }
            Ok(UpstreamEvent::Error { status, message }) => {
                tracing::warn!(
                    correlation_id = %ex.correlation_id,
                    status = ?status,
                    error = %message,
                    "upstream error after stream start"
                );
                let _ = ex.writer.write(sse::notice_event(&message)).await;
                return Ok(());
            }
            Err(QueueError::Timeout) => {
                tracing::info!(correlation_id = %ex.correlation_id, "stream idle, ending response");
                break;
            }
            Err(QueueError::Closed) => break,
        }
    }

    if ended {
        if let Some(body) = collected {
            store(ex, status, upstream_headers, body).await;
        }
    }
    Ok(())
}

async fn deliver_pseudo(ex: &Exchange<'_>) -> Result<(), RelayFailure> {
    let streaming = sse::is_streaming_path(ex.path);
    let keep_alive = if streaming {
        if !ex.writer.send_head(StatusCode::OK, sse::stream_headers()).await {
            return Err(RelayFailure::ClientGone);
        }
        Some(ex.writer.spawn_keep_alive(
            sse::keep_alive_chunk(ex.path),
            Duration::from_millis(ex.config.streaming.keep_alive_ms),
        ))
    } else {
        None
    };
    let notices = streaming.then_some(ex.writer as &dyn NoticeSink);

    let first = first_event(ex, notices).await?;
    let mut ended = matches!(first, UpstreamEvent::StreamEnd);
    let (status, mut upstream_headers, mut body) = match first {
        UpstreamEvent::ResponseHeaders { status, headers } => (status, headers, String::new()),
        UpstreamEvent::Chunk { data } => (200, BTreeMap::new(), data),
        UpstreamEvent::StreamEnd | UpstreamEvent::Error { .. } => (200, BTreeMap::new(), String::new()),
    };
    headers::strip_transport_headers(&mut upstream_headers);

    let wait = Duration::from_millis(ex.config.timeouts.first_response_ms);
    while !ended {
        match next_event(ex.queue, ex.writer, wait).await?? {
            UpstreamEvent::Chunk { data } => body.push_str(&data),
            UpstreamEvent::StreamEnd => ended = true,
            UpstreamEvent::ResponseHeaders { .. } => {
                tracing::debug!(correlation_id = %ex.correlation_id, "late response headers ignored");
            }
            UpstreamEvent::Error { status, message } => {
                let status = status.filter(|s| is_error_status(*s)).unwrap_or(502);
                return Err(RelayFailure::upstream(status, message));
            }
        }
    }
    drop(keep_alive);

    if streaming {
        if !body.is_empty() && !ex.writer.write(sse::data_event(&body)).await {
            return Err(RelayFailure::ClientGone);
        }
        if !ex.writer.write(sse::done_event()).await {
            return Err(RelayFailure::ClientGone);
        }
    } else {
        if serde_json::from_str::<serde::de::IgnoredAny>(&body).is_err() {
            tracing::error!(
                correlation_id = %ex.correlation_id,
                bytes = body.len(),
                "upstream body is not valid JSON"
            );
            return Err(RelayFailure::upstream(500, "upstream returned an invalid JSON body"));
        }
        let mut response_headers = headers::to_header_map(&upstream_headers);
        if !response_headers.contains_key(axum::http::header::CONTENT_TYPE) {
            response_headers.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        if !ex
            .writer
            .respond(status_code, response_headers, Bytes::from(body.clone()))
            .await
        {
            return Err(RelayFailure::ClientGone);
        }
    }

    store(ex, status, upstream_headers, body).await;
    Ok(())
}
