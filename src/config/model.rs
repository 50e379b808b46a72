//! Serde data structures for the wsrelay configuration file.
//!
//! [`Config`] is the root; every section has defaults so an empty file
//! is a valid configuration. All types use `deny_unknown_fields` for
//! strict parsing.

use serde::{Deserialize, Serialize};

const fn default_keep_alive_ms() -> u64 {
    2000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    2000
}

const fn default_first_response_ms() -> u64 {
    1_200_000
}

const fn default_stream_idle_ms() -> u64 {
    30_000
}

const fn default_ttl_secs() -> u64 {
    300
}

const fn default_true() -> bool {
    true
}

fn default_methods() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_credentials_dir() -> String {
    "auth".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub debug: bool,
}

/// How a relayed response is delivered to the client.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// Forward each upstream chunk as it arrives.
    #[default]
    Real,
    /// Wait for the complete upstream body, keeping the client alive meanwhile.
    Fake,
}

impl std::fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Real => "real",
            Self::Fake => "fake",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingConfig {
    #[serde(default)]
    pub mode: StreamingMode,

    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<StreamOverride>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mode: StreamingMode::default(),
            keep_alive_ms: default_keep_alive_ms(),
            overrides: Vec::new(),
        }
    }
}

/// Per-path streaming mode, matched like a route: `/exact`, `/:param`, `/prefix/*`, `/*`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StreamOverride {
    pub path: String,

    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    pub mode: StreamingMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    /// Consecutive failures before switching accounts. `0` disables count-based switching.
    #[serde(default)]
    pub failure_threshold: u32,

    #[serde(default)]
    pub immediate_switch_status_codes: Vec<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_auth_index: Option<u32>,

    #[serde(default)]
    pub manual_switch_respects_breaker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    #[serde(default = "default_first_response_ms")]
    pub first_response_ms: u64,

    #[serde(default = "default_stream_idle_ms")]
    pub stream_idle_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            first_response_ms: default_first_response_ms(),
            stream_idle_ms: default_stream_idle_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSelection {
    #[default]
    First,
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub selection: ConnectionSelection,

    /// Replace implausible upstream error statuses with one quoted in the message.
    #[serde(default = "default_true")]
    pub status_correction: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            selection: ConnectionSelection::default(),
            status_correction: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    None,
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            ttl_secs: default_ttl_secs(),
            redis_url: None,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.backend != CacheBackendKind::None && self.ttl_secs > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Keys accepted from clients. Empty leaves the relay open.
    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            credentials_dir: default_credentials_dir(),
        }
    }
}

impl Config {
    /// Copy suitable for display, with client keys masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.auth.api_keys = copy.auth.api_keys.iter().map(|_| "***".to_string()).collect();
        if copy.cache.redis_url.is_some() {
            copy.cache.redis_url = Some("***".to_string());
        }
        copy
    }
}
