//! Peer discovery for LanLink.
//!
//! Every node announces itself over UDP broadcast and listens for the
//! announcements of others.
//!
//! ## Protocol
//!
//! - Port: 8889 (UDP)
//! - Announce interval: every 5 seconds, and immediately on a state change
//! - Liveness: a user silent for 15 seconds is dropped (checked every 7.5 s)
//!
//! ## Announcement
//!
//! ```json
//! {
//!   "userId": "uuid",
//!   "nickname": "Marcus-Laptop",
//!   "state": 0,
//!   "tcpPort": 8888
//! }
//! ```
//!
//! Announcements go to `255.255.255.255` and to the broadcast address of
//! every non-loopback IPv4 interface. Each announcement received is answered
//! with a unicast announcement to its source, so two nodes learn of each
//! other within one round trip. Answers carry `"reply": true` and are not
//! answered again.

mod peers;

pub use peers::{DiscoveredUser, DiscoveryAnnouncement, DiscoveryEvent, PeerTable};

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use uuid::Uuid;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::identity::{UserIdentity, UserState};

/// Timing and ports used by the [`DiscoveryService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Interval between periodic announcements
    pub broadcast_interval: Duration,
    /// Silence after which a user is dropped
    pub user_timeout: Duration,
    /// Port announcements are broadcast to
    pub discovery_port: u16,
    /// TCP port advertised to peers
    pub tcp_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for DiscoveryConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            broadcast_interval: config.broadcast_interval,
            user_timeout: config.user_timeout,
            discovery_port: config.discovery_port,
            tcp_port: config.tcp_port,
        }
    }
}

/// UDP broadcast presence service.
#[derive(Debug)]
pub struct DiscoveryService {
    identity: UserIdentity,
    config: DiscoveryConfig,
    /// Local presence state; a change triggers an announcement
    state_tx: watch::Sender<UserState>,
    /// Users seen on the network
    peers: Arc<Mutex<PeerTable>>,
    /// Event sender
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Whether the service is running
    is_active: Arc<Mutex<bool>>,
    /// Address of the socket while running
    local_addr: Mutex<Option<SocketAddr>>,
}

impl DiscoveryService {
    /// Create a stopped service and the receiving end of its events.
    #[must_use]
    pub fn new(
        identity: UserIdentity,
        config: DiscoveryConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(UserState::Online);
        let (shutdown_tx, _) = broadcast::channel(1);

        let service = Self {
            identity,
            peers: Arc::new(Mutex::new(PeerTable::new(config.user_timeout))),
            config,
            state_tx,
            events,
            shutdown_tx,
            is_active: Arc::new(Mutex::new(false)),
            local_addr: Mutex::new(None),
        };

        (service, events_rx)
    }

    /// Bind the discovery socket on `port` and start announcing and listening.
    ///
    /// Returns the bound address. Port 0 binds an ephemeral port. Starting a
    /// running service does nothing and returns the address already bound.
    ///
    /// # Errors
    ///
    /// Returns `Error::BindFailed` if the socket cannot be bound. Binding is
    /// not retried.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut is_active = self.is_active.lock().await;
        if *is_active {
            if let Some(addr) = *self.local_addr.lock().await {
                tracing::debug!("Discovery already running on {}", addr);
                return Ok(addr);
            }
        }

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let socket = bind_socket(bind_addr).map_err(|source| Error::BindFailed {
            addr: bind_addr,
            source,
        })?;
        let local_addr = socket.local_addr()?;

        *is_active = true;
        *self.local_addr.lock().await = Some(local_addr);
        drop(is_active);

        let worker = Worker {
            socket,
            identity: self.identity.clone(),
            config: self.config,
            state_rx: self.state_tx.subscribe(),
            peers: Arc::clone(&self.peers),
            events: self.events.clone(),
        };
        let is_active = Arc::clone(&self.is_active);
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
            *is_active.lock().await = false;
        });

        tracing::info!("Discovery listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop announcing and listening, and forget every discovered user.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        while *self.is_active.lock().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        *self.local_addr.lock().await = None;
        self.peers.lock().await.clear();
    }

    /// Check if the service is running.
    pub async fn is_running(&self) -> bool {
        *self.is_active.lock().await
    }

    /// Change the local presence state, announcing it at once if it changed.
    pub fn set_user_state(&self, state: UserState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Current local presence state.
    #[must_use]
    pub fn user_state(&self) -> UserState {
        *self.state_tx.borrow()
    }

    /// Users seen on the network, excluding invisible ones.
    pub async fn discovered_users(&self) -> Vec<DiscoveredUser> {
        self.peers.lock().await.visible_users()
    }

    /// Look up a user by id.
    pub async fn discovered_user(&self, user_id: &Uuid) -> Option<DiscoveredUser> {
        self.peers.lock().await.get(user_id).cloned()
    }

    /// Whether a user is known, visible and recently heard from.
    pub async fn is_user_online(&self, user_id: &Uuid) -> bool {
        self.peers.lock().await.is_online(user_id, Instant::now())
    }
}

fn bind_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;

    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Directed broadcast addresses of the local IPv4 interfaces.
///
/// Interfaces are assumed to be /24, the common LAN prefix.
fn interface_broadcast_addrs() -> BTreeSet<Ipv4Addr> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::debug!("Could not list network interfaces: {}", e);
            return BTreeSet::new();
        }
    };

    interfaces
        .into_iter()
        .filter_map(|(_name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => {
                let [a, b, c, _] = v4.octets();
                Some(Ipv4Addr::new(a, b, c, 255))
            }
            _ => None,
        })
        .collect()
}

/// State owned by the background task.
struct Worker {
    socket: UdpSocket,
    identity: UserIdentity,
    config: DiscoveryConfig,
    state_rx: watch::Receiver<UserState>,
    peers: Arc<Mutex<PeerTable>>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl Worker {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut announce_tick = tokio::time::interval(self.config.broadcast_interval);
        let cleanup_period = self.config.user_timeout / 2;
        let mut cleanup_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + cleanup_period,
            cleanup_period,
        );
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                _ = announce_tick.tick() => self.announce().await,
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.announce().await;
                }
                _ = cleanup_tick.tick() => self.evict_stale().await,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, source)) => self.handle_datagram(&buf[..len], source).await,
                    Err(e) => tracing::warn!("Error receiving discovery datagram: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Discovery received shutdown signal");
                    break;
                }
            }
        }
    }

    fn announcement(&self, reply: bool) -> DiscoveryAnnouncement {
        DiscoveryAnnouncement {
            user_id: self.identity.uuid,
            nickname: self.identity.nickname.clone(),
            state: *self.state_rx.borrow(),
            tcp_port: self.config.tcp_port,
            reply,
        }
    }

    async fn announce(&self) {
        let json = match serde_json::to_vec(&self.announcement(false)) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize announcement: {}", e);
                return;
            }
        };

        let port = self.config.discovery_port;
        let mut targets = interface_broadcast_addrs();
        targets.insert(Ipv4Addr::BROADCAST);

        for ip in targets {
            let target = SocketAddrV4::new(ip, port);
            if let Err(e) = self.socket.send_to(&json, target).await {
                tracing::warn!("Failed to send announcement to {}: {}", target, e);
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], source: SocketAddr) {
        let announcement: DiscoveryAnnouncement = match serde_json::from_slice(datagram) {
            Ok(announcement) => announcement,
            Err(e) => {
                tracing::debug!("Ignoring malformed datagram from {}: {}", source, e);
                return;
            }
        };

        if announcement.user_id == self.identity.uuid {
            return;
        }

        let event = self
            .peers
            .lock()
            .await
            .observe(&announcement, source.ip(), Instant::now());
        if let Some(event) = event {
            tracing::debug!("Discovery event: {:?}", event);
            let _ = self.events.send(event);
        }

        if announcement.reply {
            return;
        }

        match serde_json::to_vec(&self.announcement(true)) {
            Ok(json) => {
                if let Err(e) = self.socket.send_to(&json, source).await {
                    tracing::warn!("Failed to answer {}: {}", source, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize announcement: {}", e),
        }
    }

    async fn evict_stale(&self) {
        let lost = self.peers.lock().await.evict_stale(Instant::now());
        for user_id in lost {
            tracing::debug!(%user_id, "User timed out");
            let _ = self.events.send(DiscoveryEvent::UserLost(user_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            broadcast_interval: Duration::from_secs(60),
            user_timeout: Duration::from_millis(500),
            discovery_port: 9,
            tcp_port: 4242,
        }
    }

    #[test]
    fn test_config_from_network_section() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.discovery_port, crate::DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.tcp_port, crate::DEFAULT_TCP_PORT);
        assert_eq!(config.user_timeout, crate::DEFAULT_USER_TIMEOUT);
    }

    #[tokio::test]
    async fn test_set_user_state_only_notifies_on_change() {
        let identity = UserIdentity::new(Uuid::new_v4(), "me");
        let (service, _events) = DiscoveryService::new(identity, test_config());
        let rx = service.state_tx.subscribe();

        service.set_user_state(UserState::Online);
        assert!(!rx.has_changed().unwrap());

        service.set_user_state(UserState::DoNotDisturb);
        assert!(rx.has_changed().unwrap());
        assert_eq!(service.user_state(), UserState::DoNotDisturb);
    }

    #[tokio::test]
    async fn test_start_twice_is_a_no_op_and_stop_ends_task() {
        let identity = UserIdentity::new(Uuid::new_v4(), "me");
        let (service, _events) = DiscoveryService::new(identity, test_config());

        let addr = service.start(0).await.expect("start");
        assert!(service.is_running().await);
        assert_eq!(service.start(0).await.expect("second start"), addr);

        service.stop().await;
        assert!(!service.is_running().await);

        let restarted = service.start(0).await.expect("restart");
        assert!(service.is_running().await);
        assert_ne!(restarted.port(), 0);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_stop_forgets_discovered_users() {
        let me = UserIdentity::new(Uuid::new_v4(), "me");
        let config = DiscoveryConfig {
            user_timeout: Duration::from_secs(60),
            ..test_config()
        };
        let (service, mut events) = DiscoveryService::new(me, config);
        let addr = service.start(0).await.expect("start");
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());

        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_id = Uuid::new_v4();
        let hello = DiscoveryAnnouncement {
            user_id: peer_id,
            nickname: "peer".to_string(),
            state: UserState::Online,
            tcp_port: 7000,
            reply: false,
        };
        peer_socket
            .send_to(&serde_json::to_vec(&hello).unwrap(), target)
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event in time")
            .expect("event");
        assert!(matches!(event, DiscoveryEvent::UserDiscovered(_)));
        assert!(service.is_user_online(&peer_id).await);

        service.stop().await;
        assert!(!service.is_running().await);
        assert!(service.discovered_users().await.is_empty());
        assert!(service.discovered_user(&peer_id).await.is_none());
        assert!(!service.is_user_online(&peer_id).await);
    }

    #[tokio::test]
    async fn test_datagram_is_recorded_and_answered() {
        let me = UserIdentity::new(Uuid::new_v4(), "me");
        let (service, mut events) = DiscoveryService::new(me.clone(), test_config());
        let addr = service.start(0).await.expect("start");
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());

        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_id = Uuid::new_v4();
        let hello = DiscoveryAnnouncement {
            user_id: peer_id,
            nickname: "peer".to_string(),
            state: UserState::Online,
            tcp_port: 7000,
            reply: false,
        };
        peer_socket
            .send_to(&serde_json::to_vec(&hello).unwrap(), target)
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event in time")
            .expect("event");
        let DiscoveryEvent::UserDiscovered(user) = event else {
            panic!("expected discovery, got {event:?}");
        };
        assert_eq!(user.user_id, peer_id);
        assert_eq!(user.port, 7000);

        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer_socket.recv_from(&mut buf))
            .await
            .expect("reply in time")
            .unwrap();
        let reply: DiscoveryAnnouncement = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(reply.user_id, me.uuid);
        assert_eq!(reply.tcp_port, 4242);
        assert!(reply.reply);

        assert!(service.is_user_online(&peer_id).await);
        assert_eq!(service.discovered_users().await.len(), 1);

        let lost = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("loss in time")
            .expect("event");
        assert_eq!(lost, DiscoveryEvent::UserLost(peer_id));
        assert!(service.discovered_user(&peer_id).await.is_none());

        service.stop().await;
    }

    #[tokio::test]
    async fn test_self_and_malformed_datagrams_are_ignored() {
        let me = UserIdentity::new(Uuid::new_v4(), "me");
        let (service, mut events) = DiscoveryService::new(me.clone(), test_config());
        let addr = service.start(0).await.expect("start");
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());

        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer_socket.send_to(b"not json", target).await.unwrap();
        let own = DiscoveryAnnouncement {
            user_id: me.uuid,
            nickname: "me".to_string(),
            state: UserState::Online,
            tcp_port: 1,
            reply: false,
        };
        peer_socket
            .send_to(&serde_json::to_vec(&own).unwrap(), target)
            .await
            .unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(waited.is_err());
        assert!(service.discovered_users().await.is_empty());

        service.stop().await;
    }
}
