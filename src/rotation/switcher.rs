//! Executes an account switch on the upstream side.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::upstream::protocol::SwitchAccount;
use crate::upstream::ConnectionRegistry;

pub type SwitchError = Box<dyn std::error::Error + Send + Sync>;

/// Re-establishes the upstream session under another account.
#[async_trait]
pub trait SessionSwitcher: Send + Sync {
    async fn switch_to(&self, index: u32, credential: &Value) -> Result<(), SwitchError>;
}

/// Tells every connected peer to log in with the new credential.
pub struct PeerSwitcher {
    registry: Arc<ConnectionRegistry>,
}

impl PeerSwitcher {
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SessionSwitcher for PeerSwitcher {
    async fn switch_to(&self, index: u32, credential: &Value) -> Result<(), SwitchError> {
        let frame = serde_json::to_string(&SwitchAccount::new(index, credential))?;
        match self.registry.broadcast(&frame) {
            0 => Err("no upstream connection to receive the account switch".into()),
            peers => {
                tracing::debug!(account = index, peers, "switch instruction sent");
                Ok(())
            }
        }
    }
}
