//! Short-lived connections to a running node.
//!
//! The node identifies itself right after the connection comes up; commands
//! that talk to one node wait for that frame, do their work, then flush.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use lanlink_core::connection::{Client, ClientEvent, ConnectionState};
use lanlink_core::protocol::Content;

/// How long to wait for the node to identify itself.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long to wait for queued frames to be written before exiting.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for the connection and the receiver's identification frame.
pub async fn await_peer_identity(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    addr: SocketAddr,
) -> Result<(Uuid, String)> {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Connected | ClientEvent::Reconnected => {
                tracing::debug!("Connected to {}", addr);
            }
            ClientEvent::ConnectionError(e) => bail!("Could not connect to {}: {}", addr, e),
            ClientEvent::Disconnected => bail!("{} closed the connection", addr),
            ClientEvent::MessageReceived(message) => {
                if let Content::UserDiscovery(peer) = message.content() {
                    return Ok((peer.uuid, peer.nickname.clone()));
                }
            }
        }
    }
    bail!("Connection task stopped")
}

/// Let every queued frame reach the socket, then close it.
pub async fn flush_and_disconnect(client: &mut Client) {
    client.disconnect_from_server();
    let closed = tokio::time::timeout(
        FLUSH_TIMEOUT,
        client.wait_for_state(|state| state == ConnectionState::Disconnected),
    )
    .await;
    if closed.is_err() {
        tracing::warn!("Timed out flushing outbound data");
    }
}
