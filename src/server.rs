//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state holding config, the
//! upstream registry, account rotation, cache, stats, and uptime),
//! [`build_router`] for the client-facing API listener,
//! [`build_upstream_router`] for the WebSocket listener the upstream peer
//! connects to, and [`shutdown_signal`] for SIGTERM / Ctrl+C handling.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::Router;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::cache::ResponseCache;
use crate::config::model::Config;
use crate::config::overrides::ConfigOverrides;
use crate::config::validation;
use crate::config::ConfigVersion;
use crate::error::ValidationError;
use crate::health::health_handler;
use crate::rotation::AccountRotation;
use crate::stats::CallStats;
use crate::upstream::{socket, ConnectionRegistry};
use crate::{admin, middleware, proxy};

pub const DEFAULT_MAX_BODY: usize = 100 * 1024 * 1024;

#[derive(Debug)]
pub struct LoadedConfig {
    /// Effective config: `base` with the overrides applied.
    pub config: Arc<Config>,
    /// Config exactly as the source produced it.
    pub base: Arc<Config>,
    pub version: ConfigVersion,
    pub source_name: String,
    pub loaded_at: Instant,
}

impl LoadedConfig {
    #[must_use]
    pub fn new(
        base: Config,
        overrides: &ConfigOverrides,
        version: ConfigVersion,
        source_name: impl Into<String>,
    ) -> Self {
        let mut effective = base.clone();
        overrides.apply(&mut effective);
        Self {
            config: Arc::new(effective),
            base: Arc::new(base),
            version,
            source_name: source_name.into(),
            loaded_at: Instant::now(),
        }
    }
}

pub struct AppState {
    pub config: RwLock<LoadedConfig>,
    pub overrides: RwLock<ConfigOverrides>,
    pub registry: Arc<ConnectionRegistry>,
    pub rotation: Arc<AccountRotation>,
    pub cache: Option<ResponseCache>,
    pub start_time: Instant,
    pub stats: CallStats,
}

impl AppState {
    /// Current effective config. The lock is released before returning.
    pub async fn current_config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().await.config)
    }

    /// Merge `patch` into the standing overrides and rebuild the effective
    /// config. Nothing changes when the result fails validation.
    pub async fn apply_overrides(
        &self,
        patch: ConfigOverrides,
    ) -> Result<Arc<Config>, Vec<ValidationError>> {
        let mut overrides = self.overrides.write().await;
        let mut merged = overrides.clone();
        merged.merge(patch);

        let mut loaded = self.config.write().await;
        let mut effective = (*loaded.base).clone();
        merged.apply(&mut effective);
        validation::validate(&effective)?;

        let effective = Arc::new(effective);
        loaded.config = Arc::clone(&effective);
        *overrides = merged;
        Ok(effective)
    }

    /// Swap in a freshly loaded base config, keeping the standing overrides.
    /// The current config stays when the result fails validation.
    pub async fn replace_base(
        &self,
        base: Config,
        version: ConfigVersion,
    ) -> Result<(), Vec<ValidationError>> {
        let overrides = self.overrides.read().await;
        let mut loaded = self.config.write().await;
        let next = LoadedConfig::new(base, &overrides, version, loaded.source_name.clone());
        validation::validate(&next.config)?;
        *loaded = next;
        Ok(())
    }
}

async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Router for the client-facing listener.
pub fn build_router(state: Arc<AppState>, max_body: usize) -> Router {
    let relayed = Router::new()
        .fallback(proxy::forward_handler)
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::api_key_guard,
        ))
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/health", get(health_handler))
        .route("/", any(no_content))
        .route("/favicon.ico", any(no_content))
        .merge(admin::routes(Arc::clone(&state)))
        .fallback_service(relayed)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(state)
}

/// Router for the listener the upstream peer connects to. Any path upgrades.
pub fn build_upstream_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(socket::upgrade_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
