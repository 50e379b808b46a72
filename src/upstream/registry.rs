//! Registry of live upstream peers and pending per-request queues.
//!
//! Peers register when their WebSocket is accepted and report every
//! inbound frame, error, and disconnect through [`ConnectionRegistry::handle_event`].
//! Inbound frames are routed to the [`MessageQueue`] keyed by the
//! frame's `request_id`; frames for unknown ids are dropped with a warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;

use super::protocol::{self, Inbound, UpstreamEvent};
use super::queue::MessageQueue;
use crate::config::model::ConnectionSelection;
use crate::error::RelayError;

pub type PeerId = u64;

/// Message delivered to every pending request when any peer drops.
pub const CONNECTION_LOST_MESSAGE: &str = "upstream connection lost";

/// Instruction for a peer's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Text(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: PeerId,
    pub addr: String,
    pub connected_at: Instant,
    outbound: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerHandle {
    fn send(&self, command: PeerCommand) -> Result<(), RelayError> {
        self.outbound
            .send(command)
            .map_err(|_| RelayError::PeerGone { peer: self.id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Message(String),
    Error(String),
    Disconnected,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: Mutex<Vec<PeerHandle>>,
    queues: Mutex<HashMap<String, MessageQueue<UpstreamEvent>>>,
    next_id: AtomicU64,
    cursor: AtomicUsize,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly accepted peer. The receiver feeds the peer's socket writer.
    pub fn register(
        &self,
        addr: impl Into<String>,
    ) -> (PeerHandle, mpsc::UnboundedReceiver<PeerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            addr: addr.into(),
            connected_at: Instant::now(),
            outbound: tx,
        };
        let total = {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers.push(handle.clone());
            peers.len()
        };
        tracing::info!(peer = handle.id, addr = %handle.addr, connections = total, "upstream peer connected");
        (handle, rx)
    }

    pub fn handle_event(&self, peer: PeerId, event: PeerEvent) {
        match event {
            PeerEvent::Message(text) => self.route_frame(peer, &text),
            PeerEvent::Error(error) => {
                tracing::error!(peer, error = %error, "upstream socket error");
            }
            PeerEvent::Disconnected => self.drop_peer(peer),
        }
    }

    fn route_frame(&self, peer: PeerId, text: &str) {
        let inbound = match protocol::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::error!(peer, error = %e, "failed to parse upstream frame");
                return;
            }
        };

        match inbound {
            Inbound::Routed { request_id, event } => {
                let queue = self
                    .queues
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&request_id)
                    .cloned();
                match queue {
                    Some(queue) => {
                        tracing::trace!(peer, request_id = %request_id, event = event.kind(), "routed upstream event");
                        queue.enqueue(event);
                    }
                    None => {
                        tracing::warn!(peer, request_id = %request_id, event = event.kind(), "event for unknown or expired request");
                    }
                }
            }
            Inbound::Unrecognized {
                request_id,
                event_type,
            } => {
                tracing::warn!(peer, request_id = %request_id, event_type = %event_type, "unrecognized upstream event type");
            }
            Inbound::Unaddressed => {
                tracing::warn!(peer, "upstream frame without request_id");
            }
        }
    }

    fn drop_peer(&self, peer: PeerId) {
        let remaining = {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers.retain(|p| p.id != peer);
            peers.len()
        };
        tracing::info!(peer, connections = remaining, "upstream peer disconnected");

        let queues: Vec<_> = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for queue in &queues {
            queue.enqueue(UpstreamEvent::Error {
                status: Some(503),
                message: CONNECTION_LOST_MESSAGE.into(),
            });
        }
        if !queues.is_empty() {
            tracing::warn!(peer, pending = queues.len(), "notified pending requests of lost connection");
        }
    }

    #[must_use]
    pub fn has_active_connections(&self) -> bool {
        self.connection_count() > 0
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn select_connection(&self, selection: ConnectionSelection) -> Option<PeerHandle> {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if peers.is_empty() {
            return None;
        }
        let index = match selection {
            ConnectionSelection::First => 0,
            ConnectionSelection::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % peers.len()
            }
        };
        peers.get(index).cloned()
    }

    /// Send one text frame to the peer chosen by `selection`.
    pub fn forward(&self, text: String, selection: ConnectionSelection) -> Result<PeerId, RelayError> {
        let peer = self
            .select_connection(selection)
            .ok_or(RelayError::NoUpstream)?;
        peer.send(PeerCommand::Text(text))?;
        Ok(peer.id)
    }

    /// Send a text frame to every peer, returning how many accepted it.
    pub fn broadcast(&self, text: &str) -> usize {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner).clone();
        peers
            .iter()
            .filter(|p| p.send(PeerCommand::Text(text.to_string())).is_ok())
            .count()
    }

    /// Create (or replace) the queue for `request_id`.
    pub fn create_message_queue(&self, request_id: &str) -> MessageQueue<UpstreamEvent> {
        let queue = MessageQueue::new();
        let previous = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.to_string(), queue.clone());
        if let Some(previous) = previous {
            previous.close();
        }
        queue
    }

    pub fn remove_message_queue(&self, request_id: &str) {
        let removed = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);
        if let Some(queue) = removed {
            queue.close();
        }
    }

    /// Create a queue that is closed and unregistered when the lease drops.
    pub fn lease_queue(self: &Arc<Self>, request_id: &str) -> QueueLease {
        QueueLease {
            queue: self.create_message_queue(request_id),
            request_id: request_id.to_string(),
            registry: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Ask every peer to close. Their socket tasks report the disconnect.
    pub fn shutdown(&self) {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for peer in &peers {
            let _ = peer.send(PeerCommand::Close);
        }
        tracing::info!(connections = peers.len(), "closing upstream connections");
    }
}

pub struct QueueLease {
    queue: MessageQueue<UpstreamEvent>,
    request_id: String,
    registry: Arc<ConnectionRegistry>,
}

impl QueueLease {
    #[must_use]
    pub const fn queue(&self) -> &MessageQueue<UpstreamEvent> {
        &self.queue
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        self.registry.remove_message_queue(&self.request_id);
    }
}
