//! Async file-based config source with SHA-256 change detection.
//!
//! [`FileSource`] picks its parser from the file extension, reads the
//! file through Tokio, validates the result, and versions it by the hash
//! of the raw content so the refresh loop can detect edits cheaply.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{parse_config_str, sha256_hex};
use crate::config::model::Config;
use crate::config::validation::validate;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::RelayError;

/// Names probed in the working directory when no `--config` is given.
pub const CANDIDATES: &[&str] = &[
    "wsrelay.yaml",
    "wsrelay.yml",
    "wsrelay.json",
    "wsrelay.toml",
];

#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    format: &'static str,
}

impl FileSource {
    /// Fails for extensions whose format feature is not compiled in.
    pub fn from_path(path: &Path) -> Result<Self, RelayError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let format = match ext {
            #[cfg(feature = "yaml")]
            "yaml" | "yml" => "yaml",
            #[cfg(feature = "json")]
            "json" => "json",
            #[cfg(feature = "toml")]
            "toml" => "toml",
            other => return Err(RelayError::UnsupportedFormat(other.to_string())),
        };
        Ok(Self {
            path: path.to_path_buf(),
            format,
        })
    }

    /// First existing candidate file in `dir`.
    pub async fn discover(dir: &Path) -> Result<Option<Self>, RelayError> {
        for name in CANDIDATES {
            let path = dir.join(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tracing::info!(path = %path.display(), "auto-detected config file");
                return Self::from_path(&path).map(Some);
            }
        }
        Ok(None)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_content(&self) -> Result<String, RelayError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                RelayError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.format
    }

    async fn load(&self) -> Result<(Config, ConfigVersion), RelayError> {
        let content = self.read_content().await?;
        let ext = self.path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = parse_config_str(ext, &content, &self.path.display().to_string())?;

        if let Err(errors) = validate(&config) {
            return Err(RelayError::ConfigValidation { errors });
        }

        Ok((config, ConfigVersion::Hash(sha256_hex(content.as_bytes()))))
    }

    async fn has_changed(&self, current: &ConfigVersion) -> Result<bool, RelayError> {
        let content = self.read_content().await?;
        Ok(*current != ConfigVersion::Hash(sha256_hex(content.as_bytes())))
    }
}
