//! Call statistics shared by the relay, health, and admin surfaces.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

pub const UNKNOWN_MODEL: &str = "unknown_model";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCalls {
    pub total: u64,
    pub models: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_calls: u64,
    pub cache_hits: u64,
    pub failed: u64,
    pub accounts: BTreeMap<u32, AccountCalls>,
}

#[derive(Debug, Default)]
pub struct CallStats {
    total_calls: AtomicU64,
    cache_hits: AtomicU64,
    failed: AtomicU64,
    accounts: Mutex<BTreeMap<u32, AccountCalls>>,
}

impl CallStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `index` shows up in snapshots even before its first call.
    pub fn ensure_account(&self, index: u32) {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(index)
            .or_default();
    }

    /// One relayed call attributed to `account` (when one is active) and `model`.
    pub fn record_call(&self, account: Option<u32>, model: &str) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let Some(index) = account else {
            return;
        };
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        let calls = accounts.entry(index).or_default();
        calls.total += 1;
        *calls.models.entry(model.to_string()).or_default() += 1;
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            accounts: self
                .accounts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Model named by a request: `model` in the JSON body, then
/// `generation_config.model`, then the `/models/{name}` path segment
/// (without any `:method` suffix).
#[must_use]
pub fn model_from_request(path: &str, body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let named = json
            .get("model")
            .or_else(|| json.pointer("/generation_config/model"))
            .and_then(serde_json::Value::as_str)
            .filter(|m| !m.is_empty());
        if let Some(model) = named {
            return model.to_string();
        }
    }

    path.split_once("/models/")
        .map(|(_, rest)| rest.split(['/', ':']).next().unwrap_or_default())
        .filter(|m| !m.is_empty())
        .map_or_else(|| UNKNOWN_MODEL.to_string(), String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_lookup_order() {
        assert_eq!(
            model_from_request("/v1/chat/completions", br#"{"model":"gpt-x"}"#),
            "gpt-x"
        );
        assert_eq!(
            model_from_request("/v1/x", br#"{"generation_config":{"model":"gen-1"}}"#),
            "gen-1"
        );
        assert_eq!(
            model_from_request("/v1beta/models/gemini-pro:generateContent", b"{}"),
            "gemini-pro"
        );
        assert_eq!(model_from_request("/v1beta/files", b"not json"), UNKNOWN_MODEL);
    }

    #[test]
    fn calls_are_attributed_per_account_and_model() {
        let stats = CallStats::new();
        stats.ensure_account(2);
        stats.record_call(Some(1), "a");
        stats.record_call(Some(1), "a");
        stats.record_call(Some(1), "b");
        stats.record_call(None, "a");
        stats.record_cache_hit();
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 4);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.accounts[&1].total, 3);
        assert_eq!(snap.accounts[&1].models["a"], 2);
        assert_eq!(snap.accounts[&2], AccountCalls::default());
    }
}
