//! Outbound connection with heartbeat and auto-reconnect.
//!
//! The [`Client`] handle is a thin front for a background task that owns the
//! socket. Commands go in over a channel; [`ClientEvent`]s come out on another.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                               │                  │ link lost
//!                               │ refused          ▼
//!                               └────────────▶ Reconnecting ──(every reconnect_delay)──▶ Connecting
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::identity::{UserIdentity, UserState};
use crate::protocol::{self, FrameBuffer, MessageType, NetworkMessage};

/// Upper bound on one connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Idle, no target or explicitly disconnected
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Link is up
    Connected,
    /// Link was lost; waiting to retry
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Events emitted by a [`Client`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// First connection to the target is up
    Connected,
    /// Link is up again after a loss
    Reconnected,
    /// Link went down
    Disconnected,
    /// A connect attempt failed
    ConnectionError(String),
    /// A frame other than a heartbeat arrived
    MessageReceived(NetworkMessage),
}

/// Timing used by a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Interval between heartbeats while connected
    pub heartbeat_interval: Duration,
    /// Flat delay before each reconnect attempt
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for ClientConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            reconnect_delay: config.reconnect_delay,
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect(SocketAddr),
    Disconnect,
    Send(NetworkMessage),
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: ConnectionState,
    server_addr: Option<SocketAddr>,
}

/// Handle to an outbound connection.
///
/// Dropping the handle closes the connection.
#[derive(Debug)]
pub struct Client {
    user_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    task: JoinHandle<()>,
}

impl Client {
    /// Spawn an idle client and return the receiving end of its events.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        identity: UserIdentity,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status {
            state: ConnectionState::Disconnected,
            server_addr: None,
        });

        let user_id = identity.uuid;
        let actor = Actor {
            identity,
            config,
            commands: commands_rx,
            events,
            status: status_tx,
            state: ConnectionState::Disconnected,
            target: None,
            reconnecting: false,
            stream: None,
            frames: FrameBuffer::new(),
            connecting: None,
            retry_at: None,
            heartbeat: None,
        };
        let task = tokio::spawn(actor.run());

        let client = Self {
            user_id,
            commands,
            status,
            task,
        };
        (client, events_rx)
    }

    /// Connect to `addr`.
    ///
    /// A no-op while connected. Otherwise any pending reconnect is dropped
    /// and a fresh attempt starts.
    pub fn connect_to_server(&self, addr: SocketAddr) {
        self.command(Command::Connect(addr));
    }

    /// Close the connection without scheduling a reconnect.
    pub fn disconnect_from_server(&self) {
        self.command(Command::Disconnect);
    }

    /// Send a frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` and drops the frame unless the link is up.
    pub fn send_message(&self, message: NetworkMessage) -> Result<()> {
        if !self.is_connected() {
            tracing::debug!(
                message_type = ?message.message_type(),
                "Not connected, dropping outbound message"
            );
            return Err(Error::NotConnected);
        }
        self.command(Command::Send(message));
        Ok(())
    }

    /// Announce a presence state to the server.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless the link is up.
    pub fn send_user_status(&self, state: UserState) -> Result<()> {
        self.send_message(NetworkMessage::user_status(self.user_id, self.user_id, state))
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Whether the link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the last connect target.
    #[must_use]
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.status.borrow().server_addr
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns the matching state, or `None` if the client task has ended.
    pub async fn wait_for_state(
        &mut self,
        mut predicate: impl FnMut(ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        self.status
            .wait_for(|status| predicate(status.state))
            .await
            .ok()
            .map(|status| status.state)
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Client task has stopped");
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Background task owning the socket.
struct Actor {
    identity: UserIdentity,
    config: ClientConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    status: watch::Sender<Status>,
    state: ConnectionState,
    target: Option<SocketAddr>,
    /// Set once a link was lost, until the next successful connect
    reconnecting: bool,
    stream: Option<TcpStream>,
    frames: FrameBuffer,
    connecting: Option<BoxFuture<'static, io::Result<TcpStream>>>,
    retry_at: Option<Instant>,
    heartbeat: Option<Interval>,
}

impl Actor {
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                result = poll_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                () = wait_until(self.retry_at) => {
                    self.retry_at = None;
                    self.attempt_connect();
                }
                read = read_stream(&mut self.stream, &mut buf) => match read {
                    Ok(0) => self.on_link_lost("connection closed by peer"),
                    Ok(n) => self.on_bytes(&buf[..n]),
                    Err(e) => self.on_link_lost(&e.to_string()),
                },
                () = tick(&mut self.heartbeat) => {
                    let heartbeat = NetworkMessage::heartbeat(self.identity.uuid);
                    self.write(&heartbeat).await;
                }
            }
        }

        tracing::debug!("Client task exiting");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(addr) => {
                if self.state == ConnectionState::Connected {
                    tracing::debug!("Already connected, ignoring connect to {}", addr);
                    return;
                }
                self.target = Some(addr);
                self.retry_at = None;
                self.reconnecting = false;
                self.attempt_connect();
            }
            Command::Disconnect => {
                self.retry_at = None;
                self.connecting = None;
                self.reconnecting = false;
                self.heartbeat = None;
                self.frames.clear();
                if self.stream.take().is_some() {
                    tracing::info!("Disconnected from server");
                }
                self.set_state(ConnectionState::Disconnected);
            }
            Command::Send(message) => {
                if self.state == ConnectionState::Connected {
                    self.write(&message).await;
                } else {
                    tracing::debug!(
                        message_type = ?message.message_type(),
                        "Not connected, dropping outbound message"
                    );
                }
            }
        }
    }

    fn attempt_connect(&mut self) {
        let Some(addr) = self.target else {
            return;
        };

        tracing::debug!("Connecting to {}", addr);
        self.connecting = Some(
            async move {
                tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
                    .await
                    .unwrap_or_else(|_| {
                        Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
                    })
            }
            .boxed(),
        );
        self.set_state(ConnectionState::Connecting);
    }

    async fn on_connect_result(&mut self, result: io::Result<TcpStream>) {
        match result {
            Ok(stream) => {
                super::configure_tcp_keepalive(&stream);
                self.stream = Some(stream);
                self.frames.clear();
                self.set_state(ConnectionState::Connected);

                if let Some(addr) = self.target {
                    tracing::info!("Connected to server {}", addr);
                }

                let hello = NetworkMessage::user_discovery(&self.identity);
                self.write(&hello).await;
                if self.stream.is_none() {
                    return;
                }

                let period = self.config.heartbeat_interval;
                let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);

                if self.reconnecting {
                    self.reconnecting = false;
                    self.emit(ClientEvent::Reconnected);
                } else {
                    self.emit(ClientEvent::Connected);
                }
            }
            Err(e) => {
                tracing::warn!("Connection error: {}", e);
                self.emit(ClientEvent::ConnectionError(e.to_string()));

                if self.reconnecting || e.kind() == io::ErrorKind::ConnectionRefused {
                    self.schedule_reconnect();
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    fn on_bytes(&mut self, bytes: &[u8]) {
        for message in self.frames.push(bytes) {
            if message.message_type() == MessageType::Heartbeat {
                continue;
            }
            self.emit(ClientEvent::MessageReceived(message));
        }
    }

    fn on_link_lost(&mut self, reason: &str) {
        tracing::info!("Disconnected from server: {}", reason);
        self.stream = None;
        self.heartbeat = None;
        self.frames.clear();
        self.emit(ClientEvent::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.reconnecting = true;
        self.retry_at = Some(Instant::now() + self.config.reconnect_delay);
        self.set_state(ConnectionState::Reconnecting);
    }

    async fn write(&mut self, message: &NetworkMessage) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        if let Err(e) = protocol::write_message(stream, message).await {
            match e {
                crate::Error::Io(io_error) => self.on_link_lost(&io_error.to_string()),
                other => tracing::warn!("Failed to encode outbound message: {}", other),
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        let server_addr = self.target;
        self.status.send_replace(Status { state, server_addr });
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Client event receiver dropped");
        }
    }
}

async fn poll_connect(
    connecting: &mut Option<BoxFuture<'static, io::Result<TcpStream>>>,
) -> io::Result<TcpStream> {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn read_stream(stream: &mut Option<TcpStream>, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Content;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn fast_config() -> ClientConfig {
        ClientConfig {
            heartbeat_interval: Duration::from_millis(50),
            reconnect_delay: Duration::from_millis(100),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("event")
    }

    async fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<NetworkMessage> {
        let mut frames = FrameBuffer::new();
        let mut messages = Vec::new();
        let mut buf = [0u8; 4096];
        while messages.len() < count {
            let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
                .await
                .expect("frame in time")
                .unwrap();
            assert!(n > 0, "peer closed");
            messages.extend(frames.push(&buf[..n]));
        }
        messages
    }

    #[tokio::test]
    async fn test_connect_identifies_and_heartbeats() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let identity = UserIdentity::new(Uuid::new_v4(), "alice");

        let (client, mut events) = Client::new(identity.clone(), fast_config());
        client.connect_to_server(addr);

        let (mut server_side, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);
        assert!(client.is_connected());
        assert_eq!(client.server_addr(), Some(addr));

        let frames = read_frames(&mut server_side, 2).await;
        match frames[0].content() {
            Content::UserDiscovery(payload) => {
                assert_eq!(payload.uuid, identity.uuid);
                assert_eq!(payload.nickname, "alice");
            }
            other => panic!("expected identification, got {other:?}"),
        }

        assert_eq!(frames[1].message_type(), MessageType::Heartbeat);
        assert_eq!(frames[1].sender_id(), identity.uuid);
    }

    #[tokio::test]
    async fn test_inbound_frames_skip_heartbeats() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, mut events) = Client::new(UserIdentity::new(Uuid::new_v4(), "a"), fast_config());
        client.connect_to_server(addr);
        let (mut server_side, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        let peer = Uuid::new_v4();
        let chat = NetworkMessage::chat(peer, Uuid::new_v4(), "hi");
        let mut bytes = protocol::serialize(&NetworkMessage::heartbeat(peer)).unwrap();
        bytes.extend(protocol::serialize(&chat).unwrap());
        server_side.write_all(&bytes).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::MessageReceived(chat)
        );
    }

    #[tokio::test]
    async fn test_reconnects_after_link_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, mut events) = Client::new(UserIdentity::new(Uuid::new_v4(), "a"), fast_config());
        client.connect_to_server(addr);

        let (first, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        drop(first);
        assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        let (_second, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Reconnected);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_refused_connect_keeps_retrying() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut client, mut events) =
            Client::new(UserIdentity::new(Uuid::new_v4(), "a"), fast_config());
        client.connect_to_server(addr);

        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::ConnectionError(_)
        ));
        assert_eq!(
            client
                .wait_for_state(|s| s == ConnectionState::Reconnecting)
                .await,
            Some(ConnectionState::Reconnecting)
        );

        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::ConnectionError(_)
        ));

        client.disconnect_from_server();
        assert_eq!(
            client
                .wait_for_state(|s| s == ConnectionState::Disconnected)
                .await,
            Some(ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let (client, mut events) = Client::new(UserIdentity::new(Uuid::new_v4(), "a"), fast_config());
        assert!(matches!(
            client.send_user_status(UserState::Invisible),
            Err(Error::NotConnected)
        ));
        client.disconnect_from_server();

        let waited = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(waited.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
