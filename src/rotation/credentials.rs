//! Account credential discovery.
//!
//! [`AuthSource`] finds numbered credential blobs either in environment
//! variables (`AUTH_JSON_1`, `AUTH_JSON_2`, ...) or in files named
//! `auth-<n>.json` inside the credentials directory. Accounts added at
//! runtime live in memory only and can be removed again.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::CredentialError;

const ENV_PREFIX: &str = "AUTH_JSON_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Env,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDetail {
    pub index: u32,
    pub source: &'static str,
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn mode(&self) -> AuthMode;

    /// Sorted, de-duplicated account indices.
    fn available_indices(&self) -> Vec<u32>;

    fn account_details(&self) -> Vec<AccountDetail>;

    async fn credential(&self, index: u32) -> Option<Value>;

    fn add_temporary(&self, index: u32, credential: Value) -> Result<(), CredentialError>;

    fn remove_temporary(&self, index: u32) -> Result<(), CredentialError>;
}

#[derive(Debug)]
pub struct AuthSource {
    mode: AuthMode,
    dir: PathBuf,
    permanent: BTreeSet<u32>,
    env_blobs: BTreeMap<u32, String>,
    temporary: Mutex<BTreeMap<u32, Value>>,
}

fn parse_index(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|n| *n > 0)
}

impl AuthSource {
    /// Environment mode when `AUTH_JSON_1` is set, otherwise scan `dir`.
    pub async fn discover(dir: &Path) -> Self {
        if std::env::var_os(format!("{ENV_PREFIX}1")).is_some() {
            Self::from_env_vars(std::env::vars())
        } else {
            Self::from_dir(dir).await
        }
    }

    pub fn from_env_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let env_blobs: BTreeMap<u32, String> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let index = parse_index(key.strip_prefix(ENV_PREFIX)?)?;
                Some((index, value))
            })
            .collect();
        let source = Self {
            mode: AuthMode::Env,
            dir: PathBuf::new(),
            permanent: env_blobs.keys().copied().collect(),
            env_blobs,
            temporary: Mutex::new(BTreeMap::new()),
        };
        source.log_discovery();
        source
    }

    pub async fn from_dir(dir: &Path) -> Self {
        let mut permanent = BTreeSet::new();
        match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let name = entry.file_name();
                    let index = name
                        .to_str()
                        .and_then(|n| n.strip_prefix("auth-"))
                        .and_then(|n| n.strip_suffix(".json"))
                        .and_then(parse_index);
                    if let Some(index) = index {
                        permanent.insert(index);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "credentials directory not readable");
            }
        }
        let source = Self {
            mode: AuthMode::File,
            dir: dir.to_path_buf(),
            permanent,
            env_blobs: BTreeMap::new(),
            temporary: Mutex::new(BTreeMap::new()),
        };
        source.log_discovery();
        source
    }

    fn log_discovery(&self) {
        if self.permanent.is_empty() {
            tracing::warn!(
                mode = ?self.mode,
                "no account credentials found; switching is inert until accounts are added"
            );
        } else {
            tracing::info!(mode = ?self.mode, accounts = ?self.permanent, "discovered account credentials");
        }
    }

    async fn load_permanent(&self, index: u32) -> Option<String> {
        match self.mode {
            AuthMode::Env => self.env_blobs.get(&index).cloned(),
            AuthMode::File => {
                let path = self.dir.join(format!("auth-{index}.json"));
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => Some(content),
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "failed to read credential file");
                        None
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CredentialSource for AuthSource {
    fn mode(&self) -> AuthMode {
        self.mode
    }

    fn available_indices(&self) -> Vec<u32> {
        let temporary = self.temporary.lock().unwrap_or_else(PoisonError::into_inner);
        self.permanent
            .iter()
            .chain(temporary.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn account_details(&self) -> Vec<AccountDetail> {
        let temporary = self.temporary.lock().unwrap_or_else(PoisonError::into_inner);
        let permanent_label = match self.mode {
            AuthMode::Env => "env",
            AuthMode::File => "file",
        };
        let mut details: Vec<AccountDetail> = self
            .permanent
            .iter()
            .map(|&index| AccountDetail {
                index,
                source: permanent_label,
            })
            .chain(temporary.keys().map(|&index| AccountDetail {
                index,
                source: "temporary",
            }))
            .collect();
        details.sort_by_key(|d| d.index);
        details
    }

    async fn credential(&self, index: u32) -> Option<Value> {
        let temporary = self
            .temporary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned();
        if temporary.is_some() {
            return temporary;
        }
        if !self.permanent.contains(&index) {
            return None;
        }

        let raw = self.load_permanent(index).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(account = index, error = %e, "credential is not valid JSON");
                None
            }
        }
    }

    fn add_temporary(&self, index: u32, credential: Value) -> Result<(), CredentialError> {
        if index == 0 {
            return Err(CredentialError::InvalidIndex);
        }
        if self.permanent.contains(&index) {
            return Err(CredentialError::PermanentExists(index));
        }
        if !credential.is_object() {
            return Err(CredentialError::InvalidPayload);
        }
        self.temporary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, credential);
        tracing::info!(account = index, "temporary account added");
        Ok(())
    }

    fn remove_temporary(&self, index: u32) -> Result<(), CredentialError> {
        let removed = self
            .temporary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index);
        match removed {
            Some(_) => {
                tracing::info!(account = index, "temporary account removed");
                Ok(())
            }
            None => Err(CredentialError::NotTemporary(index)),
        }
    }
}
