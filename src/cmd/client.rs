//! Small HTTP client shared by the `health` and `switch` subcommands.
//!
//! Uses a rustls connector so both `http://` and `https://` deployments
//! can be reached.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::RelayError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;
pub type HttpClient = Client<HttpsConnector, Full<Bytes>>;

#[must_use]
pub fn build_http_client() -> HttpClient {
    // With several rustls crypto providers compiled in, rustls cannot pick
    // one on its own. Install `ring` explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl Reply {
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send one bodiless request and collect the full reply.
pub async fn send(method: Method, url: &str, headers: &[(&str, &str)]) -> Result<Reply, RelayError> {
    let uri: hyper::Uri = url
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| RelayError::UriParse {
            source: Box::new(e),
        })?;

    let mut builder = hyper::Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder
        .body(Full::new(Bytes::new()))
        .map_err(|e| RelayError::HttpRequest {
            source: Box::new(e),
        })?;

    let client = build_http_client();
    let response = tokio::time::timeout(REQUEST_TIMEOUT, client.request(req))
        .await
        .map_err(|_| RelayError::HttpRequest {
            source: format!("request timed out after {}s", REQUEST_TIMEOUT.as_secs()).into(),
        })?
        .map_err(|e| RelayError::HttpRequest {
            source: Box::new(e),
        })?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| RelayError::HttpRequest {
            source: Box::new(e),
        })?
        .to_bytes();

    Ok(Reply { status, body })
}

/// `base` without trailing slashes, joined with `path`.
#[must_use]
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(endpoint("http://localhost:8889/", "/health"), "http://localhost:8889/health");
        assert_eq!(endpoint("https://relay.example", "/switch"), "https://relay.example/switch");
    }

    #[tokio::test]
    async fn invalid_url_is_reported() {
        let err = send(Method::GET, "not a url", &[]).await.unwrap_err();
        assert!(matches!(err, RelayError::UriParse { .. }));
    }
}
