//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, init, validate, health, switch), and their associated
//! argument structs. Every flag has an environment variable equivalent
//! for container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::model::StreamingMode;
use crate::config::overrides::ConfigOverrides;

#[derive(Parser)]
#[command(
    name = "wsrelay",
    version,
    about = "HTTP gateway relaying generative-AI API calls to a WebSocket-connected upstream",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        wsrelay init                         Create a starter config\n  \
        wsrelay run                          Start with ./wsrelay.yaml (or defaults)\n  \
        wsrelay run -c relay.yaml            Start with a specific config"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay
    Run(Box<RunArgs>),

    /// Generate a starter config file
    Init(InitArgs),

    /// Validate a config file without starting
    Validate(ValidateArgs),

    /// Check health of a running instance
    Health(HealthArgs),

    /// Ask a running instance to switch to the next account
    Switch(SwitchArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        wsrelay run                                       Auto-detect config\n  \
        wsrelay run -c relay.yaml -p 8080 --pretty        Local dev mode\n  \
        wsrelay run --streaming-mode fake --max-retries 5 Override relay settings")]
pub struct RunArgs {
    /// Config file path (.yaml, .json, .toml)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// API listen port
    #[arg(short, long, env = "PORT", default_value_t = 8889)]
    pub port: u16,

    /// Listen address for both listeners
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the upstream peer connects to over WebSocket
    #[arg(long, env = "WS_PORT", default_value_t = 9998)]
    pub ws_port: u16,

    // -- Relay Overrides --
    /// Delivery mode for relayed responses
    #[arg(long, env = "STREAMING_MODE", help_heading = "Relay Overrides")]
    pub streaming_mode: Option<StreamingMode>,

    /// Consecutive failures before switching accounts (0 disables)
    #[arg(long, env = "FAILURE_THRESHOLD", help_heading = "Relay Overrides")]
    pub failure_threshold: Option<u32>,

    /// Total attempts per request
    #[arg(long, env = "MAX_RETRIES", help_heading = "Relay Overrides")]
    pub max_retries: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long, env = "RETRY_DELAY", help_heading = "Relay Overrides")]
    pub retry_delay: Option<u64>,

    /// Status codes that switch accounts on first sight (comma separated)
    #[arg(
        long,
        env = "IMMEDIATE_SWITCH_STATUS_CODES",
        value_delimiter = ',',
        help_heading = "Relay Overrides"
    )]
    pub immediate_switch_status_codes: Option<Vec<u16>>,

    /// Client API keys (comma separated)
    #[arg(
        long,
        env = "API_KEYS",
        value_delimiter = ',',
        hide_env_values = true,
        help_heading = "Relay Overrides"
    )]
    pub api_keys: Option<Vec<String>>,

    /// Account to start on
    #[arg(long, env = "INITIAL_AUTH_INDEX", help_heading = "Relay Overrides")]
    pub initial_auth_index: Option<u32>,

    /// Redis URL for the response cache
    #[arg(long, env = "REDIS_URL", help_heading = "Relay Overrides")]
    pub redis_url: Option<String>,

    /// Response cache TTL in seconds (0 disables caching)
    #[arg(long, env = "CACHE_TTL", help_heading = "Relay Overrides")]
    pub cache_ttl: Option<u64>,

    /// Log full request and upstream error details
    #[arg(long, env = "DEBUG_MODE", help_heading = "Relay Overrides")]
    pub debug_mode: Option<bool>,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Observability --
    /// Sentry DSN (enables error tracking)
    #[cfg(feature = "sentry-integration")]
    #[arg(long, env = "SENTRY_DSN", help_heading = "Observability")]
    pub sentry_dsn: Option<String>,

    /// Sentry environment tag
    #[cfg(feature = "sentry-integration")]
    #[arg(long, env = "SENTRY_ENVIRONMENT", help_heading = "Observability")]
    pub sentry_environment: Option<String>,

    // -- Tuning --
    /// Max request body size in bytes
    #[arg(
        long,
        env = "MAX_BODY_SIZE",
        default_value_t = crate::server::DEFAULT_MAX_BODY,
        help_heading = "Tuning"
    )]
    pub max_body: usize,

    /// Config file poll interval in seconds
    #[arg(
        long,
        env = "POLL_INTERVAL_SECS",
        default_value_t = 30,
        help_heading = "Tuning"
    )]
    pub poll_interval: u64,
}

impl RunArgs {
    /// Overrides layered over whatever the config file says.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            streaming_mode: self.streaming_mode,
            failure_threshold: self.failure_threshold,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay,
            immediate_switch_status_codes: self.immediate_switch_status_codes.clone(),
            api_keys: self.api_keys.clone(),
            initial_auth_index: self.initial_auth_index,
            redis_url: self.redis_url.clone().filter(|u| !u.trim().is_empty()),
            cache_ttl_secs: self.cache_ttl,
            debug: self.debug_mode,
        }
    }
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        wsrelay init                          Minimal config (yaml)\n  \
        wsrelay init --full                   Every setting, documented\n  \
        wsrelay init -f toml -o relay.toml    TOML format")]
pub struct InitArgs {
    /// Output format
    #[arg(short, long, default_value = "yaml")]
    pub format: ConfigFormat,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include every setting with documentation
    #[arg(long)]
    pub full: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(default_value = "wsrelay.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Args)]
pub struct HealthArgs {
    /// URL of the running instance
    #[arg(default_value = "http://localhost:8889")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct SwitchArgs {
    /// URL of the running instance
    #[arg(default_value = "http://localhost:8889")]
    pub url: String,

    /// Dashboard key, sent as `x-dashboard-auth`
    #[arg(short, long, env = "WSRELAY_DASHBOARD_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}
