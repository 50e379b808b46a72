//! Values layered over the loaded config file.
//!
//! Overrides come from CLI flags / environment variables at startup and
//! from the admin API at runtime. They are kept separately from the file
//! contents so every hot reload can re-apply them.

use super::model::{CacheBackendKind, Config, StreamingMode};
use super::validation::is_error_status;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub streaming_mode: Option<StreamingMode>,
    pub failure_threshold: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub immediate_switch_status_codes: Option<Vec<u16>>,
    pub api_keys: Option<Vec<String>>,
    pub initial_auth_index: Option<u32>,
    pub redis_url: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    pub debug: Option<bool>,
}

impl ConfigOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Take every value set in `newer`, keeping ours where `newer` is silent.
    pub fn merge(&mut self, newer: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if newer.$field.is_some() { self.$field = newer.$field; })*
            };
        }
        take!(
            streaming_mode,
            failure_threshold,
            max_retries,
            retry_delay_ms,
            immediate_switch_status_codes,
            api_keys,
            initial_auth_index,
            redis_url,
            cache_ttl_secs,
            debug
        );
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.streaming_mode {
            config.streaming.mode = mode;
        }
        if let Some(threshold) = self.failure_threshold {
            config.rotation.failure_threshold = threshold;
        }
        if let Some(max) = self.max_retries {
            config.retry.max_retries = max;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry.retry_delay_ms = delay;
        }
        if let Some(ref codes) = self.immediate_switch_status_codes {
            let (kept, dropped): (Vec<u16>, Vec<u16>) =
                codes.iter().copied().partition(|c| is_error_status(*c));
            if !dropped.is_empty() {
                tracing::warn!(ignored = ?dropped, "ignoring non-error immediate switch status codes");
            }
            config.rotation.immediate_switch_status_codes = kept;
        }
        if let Some(ref keys) = self.api_keys {
            config.auth.api_keys = keys
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(index) = self.initial_auth_index {
            config.rotation.initial_auth_index = Some(index);
        }
        if let Some(ref url) = self.redis_url {
            config.cache.redis_url = Some(url.clone());
            if config.cache.backend == CacheBackendKind::None {
                config.cache.backend = CacheBackendKind::Redis;
            }
        }
        if let Some(ttl) = self.cache_ttl_secs {
            config.cache.ttl_secs = ttl;
        }
        if let Some(debug) = self.debug {
            config.debug = debug;
        }
    }
}
