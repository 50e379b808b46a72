//! End-to-end relay tests against a scripted upstream peer.
//!
//! Each test starts both listeners, connects a fake peer over WebSocket,
//! and drives requests through the API listener with reqwest.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use wsrelay::cache::memory::MemoryCache;
use wsrelay::cache::ResponseCache;
use wsrelay::config::model::{CacheBackendKind, Config, StreamingMode};
use wsrelay::config::overrides::ConfigOverrides;
use wsrelay::config::ConfigVersion;
use wsrelay::rotation::credentials::AuthSource;
use wsrelay::rotation::switcher::PeerSwitcher;
use wsrelay::rotation::AccountRotation;
use wsrelay::server::{self, AppState, LoadedConfig};
use wsrelay::stats::CallStats;
use wsrelay::upstream::ConnectionRegistry;

enum Step {
    Send(Value),
    Wait(u64),
}

/// Given a request frame and its attempt number, what the peer answers.
type Script = Arc<dyn Fn(&Value, usize) -> Vec<Step> + Send + Sync>;

struct Harness {
    api: SocketAddr,
    state: Arc<AppState>,
    /// Every frame the peer received, in order.
    seen: mpsc::UnboundedReceiver<Value>,
    _shutdown: watch::Sender<bool>,
}

impl Harness {
    async fn start(config: Config, script: Script) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let credentials = Arc::new(AuthSource::from_env_vars([
            ("AUTH_JSON_1".to_string(), r#"{"cookie":"one"}"#.to_string()),
            ("AUTH_JSON_2".to_string(), r#"{"cookie":"two"}"#.to_string()),
        ]));
        let rotation = Arc::new(AccountRotation::new(
            credentials,
            Arc::new(PeerSwitcher::new(Arc::clone(&registry))),
            None,
        ));
        let cache = (config.cache.backend == CacheBackendKind::Memory)
            .then(|| ResponseCache::new(Box::new(MemoryCache::new())));
        let state = Arc::new(AppState {
            config: tokio::sync::RwLock::new(LoadedConfig::new(
                config,
                &ConfigOverrides::default(),
                ConfigVersion::Hash("relay-flow".into()),
                "test",
            )),
            overrides: tokio::sync::RwLock::new(ConfigOverrides::default()),
            registry,
            rotation,
            cache,
            start_time: Instant::now(),
            stats: CallStats::new(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let api = serve(
            server::build_router(Arc::clone(&state), 1_048_576),
            shutdown_rx.clone(),
        )
        .await;
        let ws = serve(server::build_upstream_router(Arc::clone(&state)), shutdown_rx).await;

        let seen = connect_peer(ws, script).await;
        wait_for_peer(&state).await;

        Self {
            api,
            state,
            seen,
            _shutdown: shutdown_tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.api)
    }

    fn drain_seen(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.seen.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

async fn serve(router: Router, mut shutdown: watch::Receiver<bool>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .unwrap();
    });
    addr
}

async fn connect_peer(ws: SocketAddr, script: Script) -> mpsc::UnboundedReceiver<Value> {
    let (mut stream, _) = tokio_tungstenite::connect_async(format!("ws://{ws}/"))
        .await
        .unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut attempts: HashMap<String, usize> = HashMap::new();
        while let Some(Ok(message)) = stream.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            let _ = seen_tx.send(frame.clone());

            let Some(request_id) = frame["request_id"].as_str().map(str::to_owned) else {
                continue;
            };
            let attempt = attempts.entry(request_id.clone()).or_default();
            *attempt += 1;

            for step in script(&frame, *attempt) {
                match step {
                    Step::Wait(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                    Step::Send(mut reply) => {
                        reply["request_id"] = Value::from(request_id.as_str());
                        if stream.send(Message::Text(reply.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    seen_rx
}

async fn wait_for_peer(state: &AppState) {
    for _ in 0..100 {
        if state.registry.connection_count() == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upstream peer never registered");
}

fn headers(status: u16, content_type: &str) -> Step {
    Step::Send(json!({
        "event_type": "response_headers",
        "status": status,
        "headers": { "content-type": content_type, "content-length": "999" },
    }))
}

fn chunk(data: &str) -> Step {
    Step::Send(json!({ "event_type": "chunk", "data": data }))
}

fn error(status: u16, message: &str) -> Step {
    Step::Send(json!({ "event_type": "error", "status": status, "message": message }))
}

fn close() -> Step {
    Step::Send(json!({ "event_type": "stream_close" }))
}

fn fast_retries(mut config: Config) -> Config {
    config.retry.retry_delay_ms = 10;
    config
}

#[tokio::test]
async fn real_mode_forwards_chunks_in_order() {
    let script: Script = Arc::new(|_, _| {
        vec![
            headers(200, "text/event-stream"),
            chunk("data: {\"n\":1}\n\n"),
            chunk("data: {\"n\":2}\n\n"),
            close(),
        ]
    });
    let mut harness = Harness::start(Config::default(), script).await;

    let resp = reqwest::Client::new()
        .post(harness.url(
            "/v1beta/models/gemini-pro:streamGenerateContent?alt=sse&key=client-secret",
        ))
        .header("authorization", "Bearer client-secret")
        .body(r#"{"contents":[{"parts":[{"text":"hi"}]}]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let correlation_id = resp.headers()["x-correlation-id"].to_str().unwrap().to_string();
    let body = resp.text().await.unwrap();
    assert_eq!(body, "data: {\"n\":1}\n\ndata: {\"n\":2}\n\n");

    let frames = harness.drain_seen();
    assert_eq!(frames.len(), 1);
    let request = &frames[0];
    assert_eq!(request["request_id"], correlation_id.as_str());
    assert_eq!(request["method"], "POST");
    assert_eq!(request["streaming_mode"], "real");
    assert_eq!(request["query_params"]["alt"], "sse");
    assert!(request["query_params"].get("key").is_none());
    assert_eq!(request["headers"]["authorization"], "Bearer client-secret");
    assert!(request["headers"].get("host").is_none());
    assert!(request["body"].as_str().unwrap().contains("contents"));

    assert_eq!(harness.state.registry.pending_requests(), 0);
}

#[tokio::test]
async fn chunks_after_stream_close_are_dropped() {
    let script: Script = Arc::new(|_, _| {
        vec![
            headers(200, "text/plain"),
            chunk("a"),
            close(),
            chunk("late"),
        ]
    });
    let harness = Harness::start(Config::default(), script).await;

    let resp = reqwest::Client::new()
        .post(harness.url("/v1beta/models/gemini-pro:generateContent"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "a");
    assert_eq!(harness.state.registry.pending_requests(), 0);
}

#[tokio::test]
async fn stale_close_from_failed_attempt_is_not_a_reply() {
    let mut config = fast_retries(Config::default());
    config.retry.max_retries = 2;

    let script: Script = Arc::new(|_, attempt| {
        if attempt == 1 {
            vec![error(500, "internal"), close()]
        } else {
            vec![
                headers(200, "application/json"),
                chunk(r#"{"ok":true}"#),
                close(),
            ]
        }
    });
    let mut harness = Harness::start(config, script).await;

    let resp = reqwest::Client::new()
        .post(harness.url("/v1beta/models/gemini-pro:generateContent"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), r#"{"ok":true}"#);
    assert_eq!(harness.drain_seen().len(), 2);
}

#[tokio::test]
async fn immediate_switch_then_retry_succeeds() {
    let mut config = fast_retries(Config::default());
    config.rotation.immediate_switch_status_codes = vec![429];

    // The first attempt fails with a generic status that quotes the real one.
    let script: Script = Arc::new(|_, attempt| {
        if attempt == 1 {
            vec![error(500, "fetch failed: HTTP 429 Too Many Requests")]
        } else {
            vec![
                headers(200, "application/json"),
                chunk(r#"{"ok":true}"#),
                close(),
            ]
        }
    });
    let mut harness = Harness::start(config, script).await;
    assert_eq!(harness.state.rotation.current_index(), Some(1));

    let resp = reqwest::Client::new()
        .post(harness.url("/v1beta/models/gemini-pro:generateContent"))
        .body(r#"{"contents":[]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), r#"{"ok":true}"#);

    let frames = harness.drain_seen();
    let kinds: Vec<&str> = frames
        .iter()
        .map(|f| f["event_type"].as_str().unwrap_or("request"))
        .collect();
    assert_eq!(kinds, vec!["request", "switch_account", "request"]);
    assert_eq!(frames[1]["auth_index"], 2);
    assert_eq!(frames[1]["credential"]["cookie"], "two");
    assert_eq!(frames[0]["request_id"], frames[2]["request_id"]);

    let rotation = harness.state.rotation.snapshot();
    assert_eq!(rotation.current_auth_index, Some(2));
    assert_eq!(rotation.failure_count, 0);
    assert!(!rotation.full_cycle_failure);
}

#[tokio::test]
async fn exhausted_retries_return_the_upstream_status() {
    let mut config = fast_retries(Config::default());
    config.retry.max_retries = 2;

    let script: Script = Arc::new(|_, _| vec![error(503, "model overloaded")]);
    let mut harness = Harness::start(config, script).await;

    let resp = reqwest::Client::new()
        .post(harness.url("/v1/chat/completions"))
        .body(r#"{"model":"gpt-4o","messages":[]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], 503);
    assert_eq!(body["error"]["message"], "model overloaded");

    assert_eq!(harness.drain_seen().len(), 2);
    let stats = harness.state.stats.snapshot();
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.accounts[&1].models["gpt-4o"], 1);
    // Count-based switching is off by default, and 503 is not an immediate code.
    assert_eq!(harness.state.rotation.current_index(), Some(1));
}

#[tokio::test]
async fn pseudo_mode_json_response_is_cached() {
    let mut config = Config::default();
    config.streaming.mode = StreamingMode::Fake;
    config.cache.backend = CacheBackendKind::Memory;

    let script: Script = Arc::new(|_, _| {
        vec![
            headers(200, "application/json"),
            chunk(r#"{"models":["#),
            chunk(r#"{"name":"gemini-pro"}]}"#),
            close(),
        ]
    });
    let mut harness = Harness::start(config, script).await;
    let client = reqwest::Client::new();
    let url = harness.url("/v1beta/models?pageSize=10");

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.headers().get("x-proxy-cache").is_none());
    let first_body = first.text().await.unwrap();
    assert_eq!(first_body, r#"{"models":[{"name":"gemini-pro"}]}"#);

    let second = client.get(format!("{url}&key=other")).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-proxy-cache"], "HIT");
    assert_eq!(second.headers()["content-type"], "application/json");
    assert_eq!(second.text().await.unwrap(), first_body);

    let frames = harness.drain_seen();
    assert_eq!(frames.len(), 1, "cache hit must not reach the upstream");
    assert_eq!(frames[0]["streaming_mode"], "fake");
    assert!(frames[0].get("body").is_none());

    let stats = harness.state.stats.snapshot();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.total_calls, 1);
}

#[tokio::test]
async fn pseudo_mode_rejects_invalid_json_body() {
    let mut config = Config::default();
    config.streaming.mode = StreamingMode::Fake;

    let script: Script = Arc::new(|_, _| vec![chunk("not json"), close()]);
    let harness = Harness::start(config, script).await;

    let resp = reqwest::Client::new()
        .post(harness.url("/v1beta/models/gemini-pro:generateContent"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}

#[tokio::test]
async fn pseudo_stream_sends_keep_alives_then_done() {
    let mut config = Config::default();
    config.streaming.mode = StreamingMode::Fake;
    config.streaming.keep_alive_ms = 50;

    let payload = r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#;
    let script: Script = Arc::new(move |_, _| vec![Step::Wait(250), chunk(payload), close()]);
    let harness = Harness::start(config, script).await;

    let resp = reqwest::Client::new()
        .post(harness.url("/v1beta/models/gemini-pro:streamGenerateContent"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");

    let body = resp.text().await.unwrap();
    assert!(body.contains(r#""text":"""#), "expected a keep-alive chunk: {body}");
    assert!(body.contains(&format!("data: {payload}\n\n")));
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn pseudo_stream_reports_retries_inline() {
    let mut config = fast_retries(Config::default());
    config.streaming.mode = StreamingMode::Fake;
    config.retry.max_retries = 2;

    let script: Script = Arc::new(|_, attempt| {
        if attempt == 1 {
            vec![error(500, "internal")]
        } else {
            vec![chunk(r#"{"candidates":[]}"#), close()]
        }
    });
    let harness = Harness::start(config, script).await;

    let resp = reqwest::Client::new()
        .post(harness.url("/v1beta/models/gemini-pro:streamGenerateContent"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("attempt 1/2 failed with status 500"));
    assert!(body.contains(r#"data: {"candidates":[]}"#));
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn peer_disconnect_fails_pending_request() {
    let script: Script = Arc::new(|_, _| vec![Step::Wait(10_000)]);
    let harness = Harness::start(fast_retries(Config::default()), script).await;

    let state = Arc::clone(&harness.state);
    let request = tokio::spawn({
        let url = harness.url("/v1beta/models/gemini-pro:generateContent");
        async move { reqwest::Client::new().post(url).body("{}").send().await }
    });

    for _ in 0..100 {
        if state.registry.pending_requests() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    state.registry.shutdown();

    let resp = request.await.unwrap().unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "proxy_error");
    assert_eq!(state.registry.pending_requests(), 0);
}
