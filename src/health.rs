//! `GET /health` endpoint handler.
//!
//! Returns a [`HealthResponse`] JSON payload with the server version and
//! build, uptime, config source metadata, rotation state, call statistics
//! and the upstream connection picture. The status is `degraded` while no
//! upstream peer is connected or the full-cycle breaker is open.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::model::{CacheBackendKind, StreamingMode};
use crate::rotation::RotationSnapshot;
use crate::server::AppState;
use crate::stats::StatsSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub build: BuildInfo,
    pub uptime_seconds: u64,
    pub config: ConfigHealth,
    pub rotation: RotationHealth,
    pub stats: StatsSnapshot,
    pub upstream: UpstreamHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub git_sha: String,
    pub profile: String,
}

impl BuildInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            git_sha: env!("WSRELAY_GIT_SHORT").to_string(),
            profile: env!("WSRELAY_BUILD_PROFILE").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigHealth {
    pub source: String,
    pub version: String,
    pub loaded_ago_seconds: u64,
    pub streaming_mode: StreamingMode,
    pub cache_backend: CacheBackendKind,
    pub api_key_required: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RotationHealth {
    #[serde(flatten)]
    pub state: RotationSnapshot,
    pub accounts: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub connections: usize,
    pub pending_requests: usize,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (config, source_name, version, loaded_ago) = {
        let loaded = state.config.read().await;
        (
            Arc::clone(&loaded.config),
            loaded.source_name.clone(),
            loaded.version.short().to_string(),
            loaded.loaded_at.elapsed().as_secs(),
        )
    };

    let rotation = state.rotation.snapshot();
    let connections = state.registry.connection_count();
    let status = if connections == 0 || rotation.full_cycle_failure {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: BuildInfo::current(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config: ConfigHealth {
            source: source_name,
            version,
            loaded_ago_seconds: loaded_ago,
            streaming_mode: config.streaming.mode,
            cache_backend: config.cache.backend,
            api_key_required: !config.auth.api_keys.is_empty(),
        },
        rotation: RotationHealth {
            state: rotation,
            accounts: state.rotation.credentials().available_indices(),
        },
        stats: state.stats.snapshot(),
        upstream: UpstreamHealth {
            connections,
            pending_requests: state.registry.pending_requests(),
        },
    })
}
