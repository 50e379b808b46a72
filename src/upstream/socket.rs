//! WebSocket endpoint the upstream peer connects to.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;

use super::registry::{ConnectionRegistry, PeerCommand, PeerEvent};
use crate::server::AppState;

pub async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| serve_peer(socket, addr, registry))
}

async fn serve_peer(mut socket: WebSocket, addr: SocketAddr, registry: Arc<ConnectionRegistry>) {
    let (peer, mut outbound) = registry.register(addr.to_string());

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(PeerCommand::Text(text)) => {
                    if let Err(e) = socket.send(Message::Text(text.into())).await {
                        registry.handle_event(peer.id, PeerEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(PeerCommand::Close) | None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    registry.handle_event(peer.id, PeerEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    registry.handle_event(
                        peer.id,
                        PeerEvent::Message(String::from_utf8_lossy(&data).into_owned()),
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    registry.handle_event(peer.id, PeerEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }

    registry.handle_event(peer.id, PeerEvent::Disconnected);
}
