//! Administrative control surface.
//!
//! Every route except `POST /admin/verify-key` requires an
//! `x-dashboard-auth` header equal to one of the configured client keys
//! (the check is skipped while no keys are configured).

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::model::{Config, StreamingMode};
use crate::config::overrides::ConfigOverrides;
use crate::config::validation::is_error_status;
use crate::error::{CredentialError, ValidationError};
use crate::proxy::error_response;
use crate::rotation::credentials::{AccountDetail, AuthMode};
use crate::rotation::RotationSnapshot;
use crate::server::AppState;
use crate::stats::StatsSnapshot;

pub const DASHBOARD_HEADER: &str = "x-dashboard-auth";

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/data", get(dashboard_data))
        .route("/admin/config", post(patch_config))
        .route("/admin/accounts", post(add_account))
        .route("/admin/accounts/{index}", delete(remove_account))
        .route("/admin/cache/clear", post(clear_cache))
        .route("/switch", post(force_switch))
        .route_layer(axum::middleware::from_fn_with_state(state, dashboard_guard))
        .route("/admin/verify-key", post(verify_key))
}

fn key_accepted(config: &Config, key: Option<&str>) -> bool {
    config.auth.api_keys.is_empty()
        || key.is_some_and(|k| config.auth.api_keys.iter().any(|known| known == k))
}

async fn dashboard_guard(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let config = state.current_config().await;
    let key = request
        .headers()
        .get(DASHBOARD_HEADER)
        .and_then(|v| v.to_str().ok());
    if key_accepted(&config, key) {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "rejected admin request");
        error_response(StatusCode::UNAUTHORIZED, "dashboard authentication required")
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyKey {
    pub key: String,
}

async fn verify_key(State(state): State<Arc<AppState>>, Json(body): Json<VerifyKey>) -> Response {
    let config = state.current_config().await;
    let valid = key_accepted(&config, Some(body.key.trim()));
    let status = if valid {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(serde_json::json!({ "valid": valid }))).into_response()
}

#[derive(Debug, Serialize)]
pub struct DashboardData {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub auth_mode: AuthMode,
    pub rotation: RotationSnapshot,
    pub accounts: Vec<AccountDetail>,
    pub stats: StatsSnapshot,
    pub connections: usize,
    pub pending_requests: usize,
    pub cache_backend: Option<&'static str>,
    pub config: Config,
}

async fn dashboard_data(State(state): State<Arc<AppState>>) -> Json<DashboardData> {
    let config = state.current_config().await;
    let connections = state.registry.connection_count();
    let rotation = state.rotation.snapshot();
    let credentials = state.rotation.credentials();
    Json(DashboardData {
        status: if connections == 0 || rotation.full_cycle_failure {
            "degraded"
        } else {
            "healthy"
        },
        uptime_seconds: state.start_time.elapsed().as_secs(),
        auth_mode: credentials.mode(),
        rotation,
        accounts: credentials.account_details(),
        stats: state.stats.snapshot(),
        connections,
        pending_requests: state.registry.pending_requests(),
        cache_backend: state.cache.as_ref().map(|c| c.backend_name()),
        config: config.redacted(),
    })
}

/// Runtime-adjustable settings.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPatch {
    pub streaming_mode: Option<StreamingMode>,
    pub debug: Option<bool>,
    pub failure_threshold: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub immediate_switch_status_codes: Option<Vec<u16>>,
}

impl From<ConfigPatch> for ConfigOverrides {
    fn from(patch: ConfigPatch) -> Self {
        Self {
            streaming_mode: patch.streaming_mode,
            debug: patch.debug,
            failure_threshold: patch.failure_threshold,
            max_retries: patch.max_retries,
            retry_delay_ms: patch.retry_delay_ms,
            immediate_switch_status_codes: patch.immediate_switch_status_codes,
            ..Self::default()
        }
    }
}

fn validation_failure(errors: &[ValidationError]) -> Response {
    let details: Vec<Value> = errors
        .iter()
        .map(|e| {
            serde_json::json!({
                "section": e.section,
                "field": e.field,
                "message": e.message,
                "suggestion": e.suggestion,
            })
        })
        .collect();
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": {
                "code": 400,
                "message": "config patch rejected",
                "type": "proxy_error",
                "details": details,
            }
        })),
    )
        .into_response()
}

async fn patch_config(State(state): State<Arc<AppState>>, Json(patch): Json<ConfigPatch>) -> Response {
    if let Some(bad) = patch
        .immediate_switch_status_codes
        .as_ref()
        .and_then(|codes| codes.iter().find(|c| !is_error_status(**c)))
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("immediate switch status code {bad} is not in 400..=599"),
        );
    }

    match state.apply_overrides(patch.into()).await {
        Ok(config) => {
            tracing::info!(
                streaming_mode = %config.streaming.mode,
                failure_threshold = config.rotation.failure_threshold,
                max_retries = config.retry.max_retries,
                debug = config.debug,
                "runtime config updated"
            );
            Json(config.redacted()).into_response()
        }
        Err(errors) => {
            tracing::warn!(errors = errors.len(), "runtime config patch rejected");
            validation_failure(&errors)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddAccount {
    pub index: u32,
    pub auth_data: Value,
}

fn credential_failure(e: &CredentialError) -> Response {
    let status = match e {
        CredentialError::NotTemporary(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, &e.to_string())
}

async fn add_account(State(state): State<Arc<AppState>>, Json(body): Json<AddAccount>) -> Response {
    let credentials = state.rotation.credentials();
    match credentials.add_temporary(body.index, body.auth_data) {
        Ok(()) => {
            state.stats.ensure_account(body.index);
            tracing::info!(account = body.index, "temporary account added");
            Json(serde_json::json!({
                "index": body.index,
                "accounts": credentials.available_indices(),
            }))
            .into_response()
        }
        Err(e) => {
            tracing::warn!(account = body.index, error = %e, "temporary account rejected");
            credential_failure(&e)
        }
    }
}

async fn remove_account(State(state): State<Arc<AppState>>, Path(index): Path<u32>) -> Response {
    let credentials = state.rotation.credentials();
    match credentials.remove_temporary(index) {
        Ok(()) => {
            tracing::info!(account = index, "temporary account removed");
            Json(serde_json::json!({
                "index": index,
                "accounts": credentials.available_indices(),
            }))
            .into_response()
        }
        Err(e) => credential_failure(&e),
    }
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> Response {
    let Some(cache) = state.cache.as_ref() else {
        return Json(serde_json::json!({ "cleared": 0, "backend": Value::Null })).into_response();
    };
    match cache.clear().await {
        Ok(cleared) => {
            Json(serde_json::json!({ "cleared": cleared, "backend": cache.backend_name() }))
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "cache clear failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn force_switch(State(state): State<Arc<AppState>>) -> Response {
    let config = state.current_config().await;
    match state.rotation.force_switch(&config.rotation).await {
        Ok((from, to)) => {
            let from = from.map_or_else(|| "none".to_string(), |i| i.to_string());
            tracing::info!(from = %from, to, "manual account switch complete");
            Json(serde_json::json!({
                "message": format!("switched account {from} → {to}"),
                "from": from,
                "to": to,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "manual account switch refused");
            error_response(e.status(), &e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_when_no_keys_configured() {
        let config = Config::default();
        assert!(key_accepted(&config, None));

        let mut guarded = Config::default();
        guarded.auth.api_keys = vec!["k1".into()];
        assert!(!key_accepted(&guarded, None));
        assert!(!key_accepted(&guarded, Some("nope")));
        assert!(key_accepted(&guarded, Some("k1")));
    }

    #[test]
    fn patch_maps_onto_overrides() {
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"streaming_mode":"fake","max_retries":5}"#).unwrap();
        let overrides = ConfigOverrides::from(patch);
        assert_eq!(overrides.streaming_mode, Some(StreamingMode::Fake));
        assert_eq!(overrides.max_retries, Some(5));
        assert_eq!(overrides.api_keys, None);
    }

    #[test]
    fn patch_rejects_unknown_settings() {
        assert!(serde_json::from_str::<ConfigPatch>(r#"{"api_keys":["x"]}"#).is_err());
    }
}
