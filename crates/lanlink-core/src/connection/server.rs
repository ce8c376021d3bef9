//! Inbound connection registry.
//!
//! Every accepted socket gets a reader task and a writer task. The reader
//! reassembles frames and reports them as [`ServerEvent`]s; the writer drains
//! an outbound queue so sends never block on a slow peer.
//!
//! A connection starts under a random placeholder id and is re-keyed to the
//! `sender_id` of the first frame it carries. There is no proof behind that
//! id; whoever sends first under a uuid owns it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::UserState;
use crate::protocol::{self, FrameBuffer, MessageType, NetworkMessage};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Events emitted by a [`Server`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A connection identified itself under this id
    ClientConnected(Uuid),
    /// An identified connection closed
    ClientDisconnected(Uuid),
    /// A frame other than a heartbeat arrived
    MessageReceived {
        /// Registry key of the connection the frame came in on
        client_id: Uuid,
        /// The decoded frame
        message: NetworkMessage,
    },
}

/// One accepted socket as seen by the registry.
#[derive(Debug)]
struct ClientConnection {
    /// Distinguishes a connection from a later one registered under the same id
    token: u64,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

type Registry = Arc<Mutex<HashMap<Uuid, ClientConnection>>>;

/// TCP listener with a registry of connected clients.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    clients: Registry,
    shutdown_tx: broadcast::Sender<()>,
    is_active: Arc<Mutex<bool>>,
}

impl Server {
    /// Listen on all interfaces at `port` and start accepting.
    ///
    /// Port 0 picks an ephemeral port; see [`Server::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns `Error::BindFailed` if the port cannot be bound.
    pub async fn start(port: u16) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;

        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let clients: Registry = Arc::new(Mutex::new(HashMap::new()));
        let is_active = Arc::new(Mutex::new(true));

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&clients),
            events,
            shutdown_tx.clone(),
            Arc::clone(&is_active),
        ));

        tracing::info!("Server listening on {}", local_addr);

        let server = Self {
            local_addr,
            clients,
            shutdown_tx,
            is_active,
        };
        Ok((server, events_rx))
    }

    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a frame for one client.
    ///
    /// Returns `false` if the id is not registered.
    pub async fn send_to(&self, client_id: Uuid, message: &NetworkMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };

        let clients = self.clients.lock().await;
        match clients.get(&client_id) {
            Some(connection) => connection.outbound.send(frame).is_ok(),
            None => {
                tracing::debug!(client_id = %client_id, "Unknown client, dropping message");
                false
            }
        }
    }

    /// Queue a frame for every connection. Returns how many were reached.
    pub async fn broadcast(&self, message: &NetworkMessage) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };

        let clients = self.clients.lock().await;
        clients
            .values()
            .filter(|connection| connection.outbound.send(frame.clone()).is_ok())
            .count()
    }

    /// Tell every connection about a user's presence state.
    pub async fn broadcast_user_status(&self, user_id: Uuid, state: UserState) -> usize {
        let message = NetworkMessage::user_status(user_id, user_id, state);
        self.broadcast(&message).await
    }

    /// Ids of all registered connections.
    pub async fn online_clients(&self) -> Vec<Uuid> {
        self.clients.lock().await.keys().copied().collect()
    }

    /// Whether a connection is registered under `client_id`.
    pub async fn is_client_online(&self, client_id: Uuid) -> bool {
        self.clients.lock().await.contains_key(&client_id)
    }

    /// Peer address of a registered connection.
    pub async fn client_addr(&self, client_id: Uuid) -> Option<SocketAddr> {
        self.clients
            .lock()
            .await
            .get(&client_id)
            .map(|connection| connection.peer_addr)
    }

    /// Close the listener and every connection.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        self.clients.lock().await.clear();

        while *self.is_active.lock().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Whether the accept loop is still running.
    pub async fn is_running(&self) -> bool {
        *self.is_active.lock().await
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn encode(message: &NetworkMessage) -> Option<Vec<u8>> {
    match protocol::serialize(message) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("Failed to encode outbound message: {}", e);
            None
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    clients: Registry,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown_tx: broadcast::Sender<()>,
    is_active: Arc<Mutex<bool>>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut next_token: u64 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    next_token += 1;
                    tracing::info!("New client connection from {}", peer_addr);
                    tokio::spawn(serve_connection(
                        stream,
                        peer_addr,
                        next_token,
                        Arc::clone(&clients),
                        events.clone(),
                        shutdown_tx.subscribe(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                }
            },
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    tracing::info!("Server stopped");
    *is_active.lock().await = false;
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    token: u64,
    clients: Registry,
    events: mpsc::UnboundedSender<ServerEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    super::configure_tcp_keepalive(&stream);
    let (mut reader, writer) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, outbound_rx));

    let mut client_id = Uuid::new_v4();
    let mut identified = false;
    clients.lock().await.insert(
        client_id,
        ClientConnection {
            token,
            peer_addr,
            outbound,
        },
    );

    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Read from {} failed: {}", peer_addr, e);
                    break;
                }
            },
            _ = shutdown_rx.recv() => break,
        };

        for message in frames.push(&buf[..n]) {
            if message.is_invalid() {
                continue;
            }

            let sender_id = message.sender_id();
            if sender_id != client_id {
                if !rekey(&clients, client_id, sender_id, token).await {
                    // Replaced by a newer connection under the same id.
                    return;
                }
                tracing::info!(client_id = %sender_id, "Client identified from {}", peer_addr);
                client_id = sender_id;
                identified = true;
                let _ = events.send(ServerEvent::ClientConnected(client_id));
            }

            if message.message_type() == MessageType::Heartbeat {
                continue;
            }
            let _ = events.send(ServerEvent::MessageReceived { client_id, message });
        }
    }

    let removed = {
        let mut clients = clients.lock().await;
        let owned = clients
            .get(&client_id)
            .is_some_and(|connection| connection.token == token);
        if owned {
            clients.remove(&client_id);
        }
        owned
    };

    if removed && identified {
        tracing::info!(client_id = %client_id, "Client disconnected");
        let _ = events.send(ServerEvent::ClientDisconnected(client_id));
    }
}

/// Move this connection's entry from `old_id` to `new_id`.
///
/// Returns `false` if the entry under `old_id` no longer belongs to this
/// connection.
async fn rekey(clients: &Registry, old_id: Uuid, new_id: Uuid, token: u64) -> bool {
    let mut clients = clients.lock().await;
    let owned = clients
        .get(&old_id)
        .is_some_and(|connection| connection.token == token);
    if !owned {
        return false;
    }

    let Some(connection) = clients.remove(&old_id) else {
        return false;
    };
    if let Some(previous) = clients.insert(new_id, connection) {
        tracing::info!(
            client_id = %new_id,
            "Replacing existing connection from {}",
            previous.peer_addr
        );
    }
    true
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!("Write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
