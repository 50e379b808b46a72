//! Account rotation: failure counting, switching, and the full-cycle breaker.
//!
//! [`AccountRotation`] owns the active account index and decides when
//! upstream failures warrant moving to the next account. Two policies
//! trigger a switch: a configured count of consecutive failures, or any
//! status listed as an immediate-switch code. Only one switch runs at a
//! time; failures reported while a switch is running do not start another.
//!
//! The breaker remembers the account on which the current failure streak
//! began. An automatic switch that would land back on that account means
//! every account has been tried, so automatic switching stops until a
//! request succeeds or an operator forces a switch.

pub mod credentials;
pub mod switcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::model::RotationConfig;
use crate::error::RotationError;
use credentials::CredentialSource;
use switcher::SessionSwitcher;

/// Receives short human-readable progress notes during a request.
pub trait NoticeSink: Send + Sync {
    fn notice(&self, message: &str);
}

/// An upstream error status after any correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The breaker is open; the failure was not counted.
    Suppressed,
    /// Count-based switching is disabled and the status is not an immediate-switch code.
    Untracked,
    Counted { failures: u32, threshold: u32 },
    Switched { from: Option<u32>, to: u32 },
    /// Another switch was already running.
    SwitchSkipped,
    /// The switch was attempted and refused or failed.
    SwitchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched { from: Option<u32>, to: u32 },
    AlreadySwitching,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSnapshot {
    pub current_auth_index: Option<u32>,
    pub failure_count: u32,
    pub failure_streak_start: Option<u32>,
    pub full_cycle_failure: bool,
    pub is_auth_switching: bool,
}

#[derive(Debug, Default)]
struct RotationState {
    current: Option<u32>,
    failure_count: u32,
    streak_start: Option<u32>,
    full_cycle_failure: bool,
}

/// Clears the switching flag when the switch ends, however it ends.
struct SwitchingGuard<'a>(&'a AtomicBool);

impl<'a> SwitchingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SwitchingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Next account after `current` in ascending order, wrapping around.
/// With a single account the answer is that account. A `current` that is no
/// longer available restarts from the first account.
#[must_use]
pub fn next_index(available: &[u32], current: Option<u32>) -> Option<u32> {
    let first = *available.first()?;
    let Some(current) = current else {
        return Some(first);
    };
    match available.binary_search(&current) {
        Ok(pos) => Some(available.get(pos + 1).copied().unwrap_or(first)),
        Err(_) => Some(first),
    }
}

pub struct AccountRotation {
    state: Mutex<RotationState>,
    switching: AtomicBool,
    credentials: Arc<dyn CredentialSource>,
    switcher: Arc<dyn SessionSwitcher>,
}

impl AccountRotation {
    /// Starts on `requested` when it is available, otherwise on the lowest index.
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        switcher: Arc<dyn SessionSwitcher>,
        requested: Option<u32>,
    ) -> Self {
        let available = credentials.available_indices();
        let current = match requested {
            Some(index) if available.contains(&index) => Some(index),
            Some(index) => {
                tracing::warn!(requested = index, available = ?available, "initial account not available, using the first one");
                available.first().copied()
            }
            None => available.first().copied(),
        };
        Self {
            state: Mutex::new(RotationState {
                current,
                ..RotationState::default()
            }),
            switching: AtomicBool::new(false),
            credentials,
            switcher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn current_index(&self) -> Option<u32> {
        self.lock().current
    }

    #[must_use]
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> RotationSnapshot {
        let state = self.lock();
        RotationSnapshot {
            current_auth_index: state.current,
            failure_count: state.failure_count,
            failure_streak_start: state.streak_start,
            full_cycle_failure: state.full_cycle_failure,
            is_auth_switching: self.is_switching(),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialSource> {
        &self.credentials
    }

    /// A request succeeded: forget the failure streak and close the breaker.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.failure_count > 0 || state.streak_start.is_some() || state.full_cycle_failure {
            tracing::info!(
                account = ?state.current,
                failures = state.failure_count,
                breaker_was_open = state.full_cycle_failure,
                "request succeeded, failure streak reset"
            );
        }
        state.failure_count = 0;
        state.streak_start = None;
        state.full_cycle_failure = false;
    }

    /// Account for one upstream failure and switch if a policy calls for it.
    pub async fn on_failure(
        &self,
        failure: &UpstreamFailure,
        policy: &RotationConfig,
        notices: Option<&dyn NoticeSink>,
    ) -> FailureOutcome {
        let immediate = policy.immediate_switch_status_codes.contains(&failure.status);
        {
            let mut state = self.lock();
            if state.full_cycle_failure {
                tracing::warn!(status = failure.status, "all accounts failed this streak, not switching");
                return FailureOutcome::Suppressed;
            }

            if immediate {
                tracing::warn!(
                    status = failure.status,
                    account = ?state.current,
                    "immediate-switch status received"
                );
            } else if policy.failure_threshold == 0 {
                tracing::debug!(status = failure.status, "count-based switching disabled");
                return FailureOutcome::Untracked;
            } else {
                state.failure_count += 1;
                let failures = state.failure_count;
                let threshold = policy.failure_threshold;
                if failures < threshold {
                    tracing::warn!(
                        status = failure.status,
                        account = ?state.current,
                        failures,
                        threshold,
                        "upstream failure counted"
                    );
                    return FailureOutcome::Counted { failures, threshold };
                }
                tracing::warn!(failures, threshold, account = ?state.current, "failure threshold reached");
            }

            if state.streak_start.is_none() {
                state.streak_start = state.current;
            }
        }

        if let Some(sink) = notices {
            sink.notice(&format!(
                "received status {}, switching to the next account",
                failure.status
            ));
        }
        self.run_switch(notices).await
    }

    async fn run_switch(&self, notices: Option<&dyn NoticeSink>) -> FailureOutcome {
        let note = |message: String| {
            if let Some(sink) = notices {
                sink.notice(&message);
            }
        };
        match self.switch_to_next().await {
            Ok(SwitchOutcome::Switched { from, to }) => {
                note(format!("switched to account {to}"));
                FailureOutcome::Switched { from, to }
            }
            Ok(SwitchOutcome::AlreadySwitching) => FailureOutcome::SwitchSkipped,
            Err(e) => {
                tracing::error!(error = %e, "automatic account switch failed");
                note(format!("account switch failed: {e}"));
                FailureOutcome::SwitchFailed
            }
        }
    }

    /// Automatic switch. A no-op while another switch runs.
    pub async fn switch_to_next(&self) -> Result<SwitchOutcome, RotationError> {
        let Some(_guard) = SwitchingGuard::acquire(&self.switching) else {
            tracing::info!("account switch already in progress");
            return Ok(SwitchOutcome::AlreadySwitching);
        };
        let (from, to) = self.perform_switch(false, true).await?;
        Ok(SwitchOutcome::Switched { from, to })
    }

    /// Operator-initiated switch. Bypasses an open breaker unless the policy says otherwise.
    pub async fn force_switch(
        &self,
        policy: &RotationConfig,
    ) -> Result<(Option<u32>, u32), RotationError> {
        let Some(_guard) = SwitchingGuard::acquire(&self.switching) else {
            return Err(RotationError::SwitchInProgress);
        };
        self.perform_switch(true, policy.manual_switch_respects_breaker)
            .await
    }

    async fn perform_switch(
        &self,
        manual: bool,
        respect_breaker: bool,
    ) -> Result<(Option<u32>, u32), RotationError> {
        let available = self.credentials.available_indices();
        let (from, to) = {
            let mut state = self.lock();
            if state.full_cycle_failure && respect_breaker {
                return Err(RotationError::CircuitOpen);
            }
            let to = next_index(&available, state.current).ok_or(RotationError::NoAccounts)?;
            if !manual && state.streak_start == Some(to) {
                state.full_cycle_failure = true;
                tracing::error!(
                    streak_start = to,
                    accounts = ?available,
                    "every account failed in this streak, automatic switching suspended"
                );
                return Err(RotationError::CircuitOpen);
            }
            (state.current, to)
        };

        tracing::info!(from = ?from, to, manual, "switching account");
        let credential = self
            .credentials
            .credential(to)
            .await
            .ok_or(RotationError::MissingCredential(to))?;
        self.switcher
            .switch_to(to, &credential)
            .await
            .map_err(|source| RotationError::Switch { index: to, source })?;

        let mut state = self.lock();
        state.current = Some(to);
        state.failure_count = 0;
        if manual {
            state.streak_start = None;
            state.full_cycle_failure = false;
        }
        tracing::info!(account = to, "account switch complete");
        Ok((from, to))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Notify;

    use super::credentials::AuthSource;
    use super::switcher::SwitchError;
    use super::*;

    #[derive(Default)]
    struct FakeSwitcher {
        calls: Mutex<Vec<u32>>,
        fail: AtomicBool,
        gate: Option<Notify>,
        entered: AtomicUsize,
    }

    #[async_trait]
    impl SessionSwitcher for FakeSwitcher {
        async fn switch_to(&self, index: u32, _credential: &Value) -> Result<(), SwitchError> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            if let Some(ref gate) = self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err("browser crashed".into());
            }
            self.calls.lock().unwrap().push(index);
            Ok(())
        }
    }

    fn accounts(indices: &[u32]) -> Arc<dyn CredentialSource> {
        Arc::new(AuthSource::from_env_vars(
            indices.iter().map(|i| (format!("AUTH_JSON_{i}"), "{}".to_string())),
        ))
    }

    fn rotation(indices: &[u32], switcher: Arc<FakeSwitcher>) -> AccountRotation {
        AccountRotation::new(accounts(indices), switcher, None)
    }

    fn threshold(n: u32) -> RotationConfig {
        RotationConfig {
            failure_threshold: n,
            ..RotationConfig::default()
        }
    }

    fn failure(status: u16) -> UpstreamFailure {
        UpstreamFailure {
            status,
            message: "upstream said no".into(),
        }
    }

    #[test]
    fn next_index_wraps_in_ascending_order() {
        assert_eq!(next_index(&[1, 2, 3], Some(1)), Some(2));
        assert_eq!(next_index(&[1, 2, 3], Some(3)), Some(1));
        assert_eq!(next_index(&[7], Some(7)), Some(7));
        assert_eq!(next_index(&[2, 3], None), Some(2));
        assert_eq!(next_index(&[], Some(1)), None);
    }

    #[test]
    fn next_index_restarts_when_current_is_gone() {
        assert_eq!(next_index(&[1, 4, 9], Some(5)), Some(1));
        assert_eq!(next_index(&[1, 4, 9], Some(12)), Some(1));
        assert_eq!(next_index(&[4, 9], Some(1)), Some(4));
    }

    #[test]
    fn starts_on_requested_account_when_available() {
        let switcher = Arc::new(FakeSwitcher::default());
        let r = AccountRotation::new(accounts(&[1, 2, 3]), switcher.clone(), Some(2));
        assert_eq!(r.current_index(), Some(2));
        let r = AccountRotation::new(accounts(&[1, 2, 3]), switcher, Some(8));
        assert_eq!(r.current_index(), Some(1));
    }

    #[tokio::test]
    async fn switches_only_when_threshold_reached() {
        let switcher = Arc::new(FakeSwitcher::default());
        let r = rotation(&[1, 2], switcher.clone());
        let policy = threshold(3);

        for expected in 1..3 {
            assert_eq!(
                r.on_failure(&failure(500), &policy, None).await,
                FailureOutcome::Counted {
                    failures: expected,
                    threshold: 3
                }
            );
        }
        assert!(switcher.calls.lock().unwrap().is_empty());

        assert_eq!(
            r.on_failure(&failure(500), &policy, None).await,
            FailureOutcome::Switched {
                from: Some(1),
                to: 2
            }
        );
        assert_eq!(r.current_index(), Some(2));
        assert_eq!(r.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn immediate_code_switches_regardless_of_count() {
        let switcher = Arc::new(FakeSwitcher::default());
        let r = rotation(&[1, 2], switcher.clone());
        let policy = RotationConfig {
            immediate_switch_status_codes: vec![429],
            ..RotationConfig::default()
        };

        assert_eq!(
            r.on_failure(&failure(500), &policy, None).await,
            FailureOutcome::Untracked
        );
        assert_eq!(
            r.on_failure(&failure(429), &policy, None).await,
            FailureOutcome::Switched {
                from: Some(1),
                to: 2
            }
        );
        assert_eq!(*switcher.calls.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn full_cycle_opens_breaker_without_returning_to_start() {
        let switcher = Arc::new(FakeSwitcher::default());
        let r = rotation(&[1, 2, 3], switcher.clone());
        let policy = threshold(2);

        for _ in 0..6 {
            r.on_failure(&failure(500), &policy, None).await;
        }

        assert_eq!(*switcher.calls.lock().unwrap(), vec![2, 3]);
        assert_eq!(r.current_index(), Some(3));
        let snapshot = r.snapshot();
        assert!(snapshot.full_cycle_failure);
        assert_eq!(snapshot.failure_streak_start, Some(1));

        assert_eq!(
            r.on_failure(&failure(500), &policy, None).await,
            FailureOutcome::Suppressed
        );
        assert!(matches!(
            r.switch_to_next().await,
            Err(RotationError::CircuitOpen)
        ));
    }

    #[tokio::test]
    async fn success_resets_streak_and_breaker() {
        let switcher = Arc::new(FakeSwitcher::default());
        let r = rotation(&[1, 2], switcher.clone());
        let policy = threshold(1);

        r.on_failure(&failure(500), &policy, None).await;
        r.on_failure(&failure(500), &policy, None).await;
        assert!(r.snapshot().full_cycle_failure);

        r.record_success();
        let snapshot = r.snapshot();
        assert!(!snapshot.full_cycle_failure);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.failure_streak_start, None);

        assert_eq!(
            r.on_failure(&failure(500), &policy, None).await,
            FailureOutcome::Switched {
                from: Some(2),
                to: 1
            }
        );
    }

    #[tokio::test]
    async fn manual_switch_bypasses_and_clears_breaker() {
        let switcher = Arc::new(FakeSwitcher::default());
        let r = rotation(&[1, 2], switcher.clone());
        let policy = threshold(1);
        r.on_failure(&failure(500), &policy, None).await;
        r.on_failure(&failure(500), &policy, None).await;
        assert!(r.snapshot().full_cycle_failure);

        let strict = RotationConfig {
            manual_switch_respects_breaker: true,
            ..policy.clone()
        };
        assert!(matches!(
            r.force_switch(&strict).await,
            Err(RotationError::CircuitOpen)
        ));

        assert_eq!(r.force_switch(&policy).await.unwrap(), (Some(2), 1));
        assert!(!r.snapshot().full_cycle_failure);
        assert_eq!(r.snapshot().failure_streak_start, None);
    }

    #[tokio::test]
    async fn failed_switch_keeps_current_account() {
        let switcher = Arc::new(FakeSwitcher::default());
        switcher.fail.store(true, Ordering::SeqCst);
        let r = rotation(&[1, 2], switcher.clone());

        assert_eq!(
            r.on_failure(&failure(500), &threshold(1), None).await,
            FailureOutcome::SwitchFailed
        );
        assert_eq!(r.current_index(), Some(1));
        assert!(!r.snapshot().full_cycle_failure);
        assert!(!r.is_switching());
    }

    #[tokio::test]
    async fn switching_is_mutually_exclusive() {
        let switcher = Arc::new(FakeSwitcher {
            gate: Some(Notify::new()),
            ..FakeSwitcher::default()
        });
        let r = Arc::new(rotation(&[1, 2, 3], switcher.clone()));

        let background = {
            let r = Arc::clone(&r);
            tokio::spawn(async move { r.force_switch(&RotationConfig::default()).await })
        };
        while switcher.entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(r.is_switching());

        assert_eq!(
            r.switch_to_next().await.unwrap(),
            SwitchOutcome::AlreadySwitching
        );
        assert!(matches!(
            r.force_switch(&RotationConfig::default()).await,
            Err(RotationError::SwitchInProgress)
        ));

        if let Some(ref gate) = switcher.gate {
            gate.notify_one();
        }
        assert_eq!(background.await.unwrap().unwrap(), (Some(1), 2));
        assert!(!r.is_switching());
        assert_eq!(*switcher.calls.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn no_accounts_means_no_switch() {
        let r = rotation(&[], Arc::new(FakeSwitcher::default()));
        assert_eq!(r.current_index(), None);
        assert!(matches!(
            r.force_switch(&RotationConfig::default()).await,
            Err(RotationError::NoAccounts)
        ));
    }

    #[tokio::test]
    async fn notices_describe_the_switch() {
        struct Collect(Mutex<Vec<String>>);
        impl NoticeSink for Collect {
            fn notice(&self, message: &str) {
                self.0.lock().unwrap().push(message.to_string());
            }
        }

        let sink = Collect(Mutex::new(Vec::new()));
        let r = rotation(&[1, 2], Arc::new(FakeSwitcher::default()));
        r.on_failure(&failure(503), &threshold(1), Some(&sink as &dyn NoticeSink))
            .await;

        let notes = sink.0.lock().unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].contains("503"));
        assert!(notes[1].contains("account 2"));
    }
}
