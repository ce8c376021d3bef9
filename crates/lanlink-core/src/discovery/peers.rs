//! In-memory table of discovered users.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserState;

/// Presence datagram exchanged on the discovery port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryAnnouncement {
    /// Announcing user
    pub user_id: Uuid,
    /// Display name
    pub nickname: String,
    /// Presence state
    pub state: UserState,
    /// Port of the user's TCP service
    pub tcp_port: u16,
    /// Set on unicast answers so they are not answered again
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reply: bool,
}

/// A user seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUser {
    /// User id
    pub user_id: Uuid,
    /// Display name
    pub nickname: String,
    /// Source address of the last announcement
    pub address: IpAddr,
    /// TCP service port
    pub port: u16,
    /// Last announced state
    pub state: UserState,
    /// When the last announcement arrived
    pub last_seen: Instant,
}

impl DiscoveredUser {
    /// Address of the user's TCP service.
    #[must_use]
    pub const fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Changes in the discovered-user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// First announcement from a user, or the first after being lost
    UserDiscovered(DiscoveredUser),
    /// A known user announced a different state
    UserStateChanged {
        /// User id
        user_id: Uuid,
        /// New state
        state: UserState,
    },
    /// A user stopped announcing
    UserLost(Uuid),
}

/// Discovered users with timeout-based liveness.
///
/// Time is passed in explicitly so the rules can be exercised without sockets.
#[derive(Debug)]
pub struct PeerTable {
    users: HashMap<Uuid, DiscoveredUser>,
    timeout: Duration,
}

impl PeerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            users: HashMap::new(),
            timeout,
        }
    }

    /// Upsert the announcing user.
    ///
    /// Returns an event for a new user or a state change; a refresh with the
    /// same state returns `None`.
    pub fn observe(
        &mut self,
        announcement: &DiscoveryAnnouncement,
        address: IpAddr,
        now: Instant,
    ) -> Option<DiscoveryEvent> {
        let user = DiscoveredUser {
            user_id: announcement.user_id,
            nickname: announcement.nickname.clone(),
            address,
            port: announcement.tcp_port,
            state: announcement.state,
            last_seen: now,
        };

        match self.users.insert(user.user_id, user.clone()) {
            None => Some(DiscoveryEvent::UserDiscovered(user)),
            Some(previous) if previous.state != user.state => {
                Some(DiscoveryEvent::UserStateChanged {
                    user_id: user.user_id,
                    state: user.state,
                })
            }
            Some(_) => None,
        }
    }

    /// Remove users not heard from within the timeout.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<Uuid> {
        let timeout = self.timeout;
        let stale: Vec<Uuid> = self
            .users
            .values()
            .filter(|u| now.saturating_duration_since(u.last_seen) > timeout)
            .map(|u| u.user_id)
            .collect();

        for id in &stale {
            self.users.remove(id);
        }
        stale
    }

    /// Users that are not invisible.
    #[must_use]
    pub fn visible_users(&self) -> Vec<DiscoveredUser> {
        self.users
            .values()
            .filter(|u| u.state != UserState::Invisible)
            .cloned()
            .collect()
    }

    /// Look up a user, invisible or not.
    #[must_use]
    pub fn get(&self, user_id: &Uuid) -> Option<&DiscoveredUser> {
        self.users.get(user_id)
    }

    /// Known, not invisible, and heard from within the timeout.
    #[must_use]
    pub fn is_online(&self, user_id: &Uuid, now: Instant) -> bool {
        self.users.get(user_id).is_some_and(|u| {
            u.state != UserState::Invisible
                && now.saturating_duration_since(u.last_seen) <= self.timeout
        })
    }

    /// Forget every user.
    pub fn clear(&mut self) {
        self.users.clear();
    }

    /// Number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn announcement(user_id: Uuid, state: UserState) -> DiscoveryAnnouncement {
        DiscoveryAnnouncement {
            user_id,
            nickname: "alice".to_string(),
            state,
            tcp_port: 8888,
            reply: false,
        }
    }

    fn lan_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))
    }

    #[test]
    fn test_first_sighting_is_discovery() {
        let mut table = PeerTable::new(TIMEOUT);
        let id = Uuid::new_v4();
        let now = Instant::now();

        let event = table.observe(&announcement(id, UserState::Online), lan_ip(), now);
        let Some(DiscoveryEvent::UserDiscovered(user)) = event else {
            panic!("expected discovery, got {event:?}");
        };
        assert_eq!(user.tcp_addr(), SocketAddr::new(lan_ip(), 8888));
    }

    #[test]
    fn test_refresh_without_change_is_silent() {
        let mut table = PeerTable::new(TIMEOUT);
        let id = Uuid::new_v4();
        let now = Instant::now();

        let _ = table.observe(&announcement(id, UserState::Online), lan_ip(), now);
        assert_eq!(
            table.observe(
                &announcement(id, UserState::Online),
                lan_ip(),
                now + Duration::from_secs(5)
            ),
            None
        );
        assert_eq!(
            table.observe(
                &announcement(id, UserState::DoNotDisturb),
                lan_ip(),
                now + Duration::from_secs(6)
            ),
            Some(DiscoveryEvent::UserStateChanged {
                user_id: id,
                state: UserState::DoNotDisturb
            })
        );
    }

    #[test]
    fn test_eviction_then_rediscovery() {
        let mut table = PeerTable::new(TIMEOUT);
        let id = Uuid::new_v4();
        let start = Instant::now();

        let _ = table.observe(&announcement(id, UserState::Online), lan_ip(), start);
        assert!(table.evict_stale(start + TIMEOUT).is_empty());

        let later = start + TIMEOUT + Duration::from_secs(1);
        assert_eq!(table.evict_stale(later), vec![id]);
        assert!(table.evict_stale(later).is_empty());
        assert!(table.is_empty());

        let event = table.observe(&announcement(id, UserState::Online), lan_ip(), later);
        assert!(matches!(event, Some(DiscoveryEvent::UserDiscovered(_))));
    }

    #[test]
    fn test_clear_then_rediscovery() {
        let mut table = PeerTable::new(TIMEOUT);
        let id = Uuid::new_v4();
        let now = Instant::now();

        let _ = table.observe(&announcement(id, UserState::Online), lan_ip(), now);
        table.clear();
        assert!(table.is_empty());
        assert!(!table.is_online(&id, now));

        let event = table.observe(&announcement(id, UserState::Online), lan_ip(), now);
        assert!(matches!(event, Some(DiscoveryEvent::UserDiscovered(_))));
    }

    #[test]
    fn test_invisible_users_are_hidden() {
        let mut table = PeerTable::new(TIMEOUT);
        let visible = Uuid::new_v4();
        let hidden = Uuid::new_v4();
        let now = Instant::now();

        let _ = table.observe(&announcement(visible, UserState::Online), lan_ip(), now);
        let _ = table.observe(&announcement(hidden, UserState::Invisible), lan_ip(), now);

        let users = table.visible_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, visible);
        assert!(table.get(&hidden).is_some());
        assert!(table.is_online(&visible, now));
        assert!(!table.is_online(&hidden, now));
        assert!(!table.is_online(&visible, now + TIMEOUT + Duration::from_secs(1)));
    }

    #[test]
    fn test_announcement_wire_format() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(announcement(id, UserState::DoNotDisturb)).unwrap();
        assert_eq!(json["userId"], id.to_string());
        assert_eq!(json["state"], 1);
        assert_eq!(json["tcpPort"], 8888);
        assert!(json.get("reply").is_none());

        let missing_port = serde_json::json!({
            "userId": id,
            "nickname": "bob",
            "state": 0
        });
        assert!(serde_json::from_value::<DiscoveryAnnouncement>(missing_port).is_err());
    }
}
