//! The WebSocket side of the relay.
//!
//! - [`queue`] -- per-request FIFO mailbox with timeout and close semantics.
//! - [`protocol`] -- JSON frames exchanged with the peer.
//! - [`registry`] -- live peers, request routing, and disconnect fan-out.
//! - [`socket`] -- axum WebSocket handler feeding the registry.

pub mod protocol;
pub mod queue;
pub mod registry;
pub mod socket;

pub use protocol::{ProxyRequest, UpstreamEvent};
pub use queue::MessageQueue;
pub use registry::{ConnectionRegistry, PeerCommand, PeerEvent, PeerId, QueueLease};
