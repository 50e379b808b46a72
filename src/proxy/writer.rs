//! Channel between a relay task and the HTTP response it produces.
//!
//! The relay runs in its own task and talks to the client through a
//! [`ResponseWriter`]. The first frame is always the head; everything
//! after it is body bytes. The handler side ([`PendingResponse`]) waits
//! for the head and turns the remaining frames into a streaming body.
//! Dropping every writer handle ends the body. When the client goes away
//! the receiver is dropped and [`ResponseWriter::closed`] resolves.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::{error_response, sse};
use crate::rotation::NoticeSink;

const FRAME_BUFFER: usize = 64;

#[derive(Debug)]
enum Frame {
    Head { status: StatusCode, headers: HeaderMap },
    Data(Bytes),
}

#[must_use]
pub fn channel(correlation_id: &str) -> (ResponseWriter, PendingResponse) {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    (
        ResponseWriter {
            tx,
            head_sent: AtomicBool::new(false),
        },
        PendingResponse {
            rx,
            correlation_id: correlation_id.to_string(),
        },
    )
}

pub struct ResponseWriter {
    tx: mpsc::Sender<Frame>,
    head_sent: AtomicBool,
}

impl ResponseWriter {
    #[must_use]
    pub fn headers_sent(&self) -> bool {
        self.head_sent.load(Ordering::Acquire)
    }

    /// Resolves once the client has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send status and headers. Returns `false` if a head was already sent
    /// or the client is gone.
    pub async fn send_head(&self, status: StatusCode, headers: HeaderMap) -> bool {
        if self.head_sent.swap(true, Ordering::AcqRel) {
            tracing::warn!(status = %status, "response head already sent");
            return false;
        }
        self.tx.send(Frame::Head { status, headers }).await.is_ok()
    }

    /// Append body bytes, waiting for buffer space. Returns `false` if the client is gone.
    pub async fn write(&self, data: Bytes) -> bool {
        if !self.headers_sent() {
            tracing::warn!("body write before response head dropped");
            return false;
        }
        self.tx.send(Frame::Data(data)).await.is_ok()
    }

    /// Append body bytes without waiting; skipped when the buffer is full.
    pub fn try_write(&self, data: Bytes) -> bool {
        if !self.headers_sent() {
            return false;
        }
        match self.tx.try_send(Frame::Data(data)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("client buffer full, skipping best-effort write");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Send a complete response in one go.
    pub async fn respond(&self, status: StatusCode, headers: HeaderMap, body: Bytes) -> bool {
        self.send_head(status, headers).await && (body.is_empty() || self.write(body).await)
    }

    /// Report a failure: a JSON error response if nothing was sent yet,
    /// otherwise an in-band notice on the open stream.
    pub async fn fail(&self, status: StatusCode, message: &str) {
        if self.headers_sent() {
            let _ = self.write(sse::notice_event(message)).await;
            return;
        }
        let (parts, body) = error_response(status, message).into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .unwrap_or_default();
        self.respond(parts.status, parts.headers, bytes).await;
    }

    /// Emit `chunk` every `period` until the returned handle is dropped.
    #[must_use]
    pub fn spawn_keep_alive(&self, chunk: Bytes, period: Duration) -> KeepAlive {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match tx.try_send(Frame::Data(chunk.clone())) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        });
        KeepAlive(handle)
    }
}

impl NoticeSink for ResponseWriter {
    fn notice(&self, message: &str) {
        if !self.try_write(sse::notice_event(message)) {
            tracing::debug!(notice = %message, "notice not delivered");
        }
    }
}

/// Stops the keep-alive ticker when dropped.
pub struct KeepAlive(JoinHandle<()>);

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct PendingResponse {
    rx: mpsc::Receiver<Frame>,
    correlation_id: String,
}

impl PendingResponse {
    /// Wait for the head and stream the rest as the response body.
    pub async fn into_response(mut self) -> Response {
        let mut response = match self.rx.recv().await {
            Some(Frame::Head { status, headers }) => {
                let body = Body::from_stream(futures_util::stream::unfold(
                    self.rx,
                    |mut rx| async move {
                        while let Some(frame) = rx.recv().await {
                            if let Frame::Data(bytes) = frame {
                                return Some((Ok::<_, Infallible>(bytes), rx));
                            }
                        }
                        None
                    },
                ));
                let mut response = Response::new(body);
                *response.status_mut() = status;
                response.headers_mut().extend(headers);
                response
            }
            Some(Frame::Data(_)) | None => {
                tracing::error!(correlation_id = %self.correlation_id, "relay ended without a response");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "relay ended without producing a response",
                )
                .into_response()
            }
        };
        if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
            response.headers_mut().insert("x-correlation-id", value);
        }
        response
    }
}
