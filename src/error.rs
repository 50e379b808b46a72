//! Unified error types for wsrelay.
//!
//! [`RelayError`] is the main crate error enum. The narrower
//! [`QueueError`], [`RotationError`] and [`CredentialError`] describe
//! failures of the relay primitives and convert into it. Config
//! validation failures are collected as [`ValidationError`] values.
//! Messages carry contextual hints to guide the operator toward a fix.

use std::path::PathBuf;

use http::StatusCode;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub section: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {}.{}: {}", self.section, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String only fails on OOM
        let _ = write!(buf, "{e}");
    }
    buf
}

/// Failure to obtain the next event from a per-request message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue timed out waiting for an upstream event")]
    Timeout,

    #[error("queue is closed")]
    Closed,
}

impl QueueError {
    /// Status code reported to the client when the queue fails before a response exists.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Closed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("an account switch is already in progress")]
    SwitchInProgress,

    #[error("every available account failed in this streak; switching is suspended until a request succeeds")]
    CircuitOpen,

    #[error("no accounts are available")]
    NoAccounts,

    #[error("no credential could be loaded for account {0}")]
    MissingCredential(u32),

    #[error("switch to account {index} failed: {source}")]
    Switch {
        index: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RotationError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::SwitchInProgress => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen | Self::NoAccounts => StatusCode::SERVICE_UNAVAILABLE,
            Self::MissingCredential(_) | Self::Switch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("account index must be a positive integer")]
    InvalidIndex,

    #[error("account {0} already exists as a permanent account")]
    PermanentExists(u32),

    #[error("account {0} is not a temporary account")]
    NotTemporary(u32),

    #[error("credential payload must be a JSON object")]
    InvalidPayload,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("File already exists: {}", path.display())]
    FileExists { path: PathBuf },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(StatusCode),

    #[error("Account switch request failed with status {status}: {message}")]
    SwitchFailed { status: StatusCode, message: String },

    #[error("No upstream connection available")]
    NoUpstream,

    #[error("Upstream connection {peer} is gone")]
    PeerGone { peer: u64 },

    #[error("Failed to encode upstream message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Cache error ({backend}): {source}")]
    Cache {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
