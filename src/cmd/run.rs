//! `wsrelay run` — start the relay.
//!
//! Loads configuration (file or built-in defaults) and layers the CLI
//! overrides on top, discovers account credentials, wires the upstream
//! registry, account rotation and response cache together, then serves
//! the API listener and the upstream WebSocket listener until a shutdown
//! signal arrives. A background loop hot-reloads the config file.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::memory::MemoryCache;
use crate::cache::ResponseCache;
use crate::cli::RunArgs;
use crate::config::model::{CacheBackendKind, CacheConfig};
use crate::config::sources::defaults::DefaultsSource;
use crate::config::sources::file_source::FileSource;
use crate::config::{validation, ConfigSource};
use crate::error::RelayError;
use crate::logging;
use crate::rotation::credentials::{AuthSource, CredentialSource};
use crate::rotation::switcher::PeerSwitcher;
use crate::rotation::AccountRotation;
use crate::server::{self, AppState, LoadedConfig};
use crate::stats::CallStats;
use crate::upstream::ConnectionRegistry;

pub async fn execute(args: RunArgs) -> Result<(), RelayError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    #[cfg(feature = "sentry-integration")]
    let _sentry_guard = args
        .sentry_dsn
        .as_ref()
        .map(|dsn| crate::sentry_integration::init(dsn, args.sentry_environment.as_deref()));

    let source = resolve_source(args.config.as_deref()).await?;
    let (base, version) = source.load().await?;
    let overrides = args.overrides();
    let loaded = LoadedConfig::new(base, &overrides, version, source.name());
    validation::validate(&loaded.config).map_err(|errors| RelayError::ConfigValidation { errors })?;
    let config = Arc::clone(&loaded.config);

    let registry = Arc::new(ConnectionRegistry::new());
    let credentials: Arc<dyn CredentialSource> =
        Arc::new(AuthSource::discover(Path::new(&config.auth.credentials_dir)).await);
    let rotation = Arc::new(AccountRotation::new(
        Arc::clone(&credentials),
        Arc::new(PeerSwitcher::new(Arc::clone(&registry))),
        config.rotation.initial_auth_index,
    ));

    let stats = CallStats::new();
    for index in credentials.available_indices() {
        stats.ensure_account(index);
    }

    let state = Arc::new(AppState {
        config: tokio::sync::RwLock::new(loaded),
        overrides: tokio::sync::RwLock::new(overrides),
        registry: Arc::clone(&registry),
        rotation,
        cache: build_cache(&config.cache).await,
        start_time: Instant::now(),
        stats,
    });

    // Flipping the watch to `true` stops both listeners and the refresh loop.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let refresh_state = Arc::clone(&state);
    let refresh_handle = tokio::spawn(config_refresh_loop(
        refresh_state,
        source,
        args.poll_interval,
        shutdown_rx.clone(),
    ));

    let api_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let ws_addr: SocketAddr = format!("{}:{}", args.host, args.ws_port).parse()?;
    let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await?;

    tracing::info!(
        api = %api_addr,
        upstream = %ws_addr,
        streaming_mode = %config.streaming.mode,
        accounts = ?credentials.available_indices(),
        account = ?state.rotation.current_index(),
        auth_mode = ?credentials.mode(),
        cache = state.cache.as_ref().map_or("disabled", ResponseCache::backend_name),
        "wsrelay started"
    );

    let api = axum::serve(
        api_listener,
        server::build_router(Arc::clone(&state), args.max_body)
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let upstream = axum::serve(
        ws_listener,
        server::build_upstream_router(Arc::clone(&state))
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let signal = async move {
        server::shutdown_signal().await;
        registry.shutdown();
        let _ = shutdown_tx.send(true);
    };

    let (api_result, upstream_result, ()) =
        tokio::join!(api.into_future(), upstream.into_future(), signal);
    api_result?;
    upstream_result?;

    if let Err(e) = refresh_handle.await {
        tracing::error!(error = %e, "config refresh task failed");
    }

    tracing::info!("wsrelay stopped");
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn resolve_source(explicit: Option<&Path>) -> Result<Box<dyn ConfigSource>, RelayError> {
    if let Some(path) = explicit {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(RelayError::ConfigFileNotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok(Box::new(FileSource::from_path(path)?));
    }

    match FileSource::discover(Path::new(".")).await? {
        Some(source) => Ok(Box::new(source)),
        None => {
            tracing::info!("no config file found, using built-in defaults");
            Ok(Box::new(DefaultsSource))
        }
    }
}

/// Cache backend chosen at startup. An unreachable Redis disables caching
/// rather than failing the start.
async fn build_cache(cache: &CacheConfig) -> Option<ResponseCache> {
    match cache.backend {
        CacheBackendKind::None => None,
        CacheBackendKind::Memory => Some(ResponseCache::new(Box::new(MemoryCache::new()))),
        #[cfg(feature = "redis")]
        CacheBackendKind::Redis => {
            let Some(url) = cache.redis_url.as_deref() else {
                tracing::warn!("redis cache selected without a redis_url, caching disabled");
                return None;
            };
            match crate::cache::redis_cache::RedisCache::connect(url).await {
                Ok(backend) => Some(ResponseCache::new(Box::new(backend))),
                Err(e) => {
                    tracing::warn!(error = %e, "redis unavailable, caching disabled");
                    None
                }
            }
        }
        #[cfg(not(feature = "redis"))]
        CacheBackendKind::Redis => {
            tracing::warn!("built without the `redis` feature, caching disabled");
            None
        }
    }
}

async fn config_refresh_loop(
    state: Arc<AppState>,
    source: Box<dyn ConfigSource>,
    interval_secs: u64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::debug!("config refresh loop shutting down");
                return;
            }
        }

        let current_version = state.config.read().await.version.clone();

        match source.has_changed(&current_version).await {
            Ok(true) => {
                tracing::info!(source = source.name(), "config change detected, reloading");
                match source.load().await {
                    Ok((config, version)) => {
                        let short = version.short().to_string();
                        match state.replace_base(config, version).await {
                            Ok(()) => tracing::info!(version = %short, "config reloaded"),
                            Err(errors) => {
                                for error in &errors {
                                    tracing::error!(error = %error, "reloaded config rejected");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "config reload failed, keeping current config");
                    }
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "config change check failed");
            }
        }
    }
}
