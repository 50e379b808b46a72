//! Built-in configuration used when no config file is found.

use async_trait::async_trait;

use super::sha256_hex;
use crate::config::model::Config;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::RelayError;

#[derive(Debug, Default)]
pub struct DefaultsSource;

#[async_trait]
impl ConfigSource for DefaultsSource {
    fn name(&self) -> &'static str {
        "defaults"
    }

    async fn load(&self) -> Result<(Config, ConfigVersion), RelayError> {
        Ok((Config::default(), ConfigVersion::Hash(sha256_hex(b"defaults"))))
    }

    async fn has_changed(&self, _current: &ConfigVersion) -> Result<bool, RelayError> {
        Ok(false)
    }
}
