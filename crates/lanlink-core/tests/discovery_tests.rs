//! Discovery service driven by a hand-rolled peer socket.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use lanlink_core::discovery::{
    DiscoveryAnnouncement, DiscoveryConfig, DiscoveryEvent, DiscoveryService,
};
use lanlink_core::identity::{UserIdentity, UserState};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use uuid::Uuid;

use common::{get_test_ports, loopback, recv_within};

fn quiet_config(tcp_port: u16) -> DiscoveryConfig {
    DiscoveryConfig {
        broadcast_interval: Duration::from_secs(60),
        user_timeout: Duration::from_secs(30),
        discovery_port: 9,
        tcp_port,
    }
}

fn announcement(user_id: Uuid, state: UserState, reply: bool) -> Vec<u8> {
    serde_json::to_vec(&DiscoveryAnnouncement {
        user_id,
        nickname: "carol".to_string(),
        state,
        tcp_port: 8888,
        reply,
    })
    .expect("encode announcement")
}

async fn started(
    tcp_port: u16,
) -> (
    DiscoveryService,
    SocketAddr,
    mpsc::UnboundedReceiver<DiscoveryEvent>,
) {
    let identity = UserIdentity::new(Uuid::new_v4(), "dave");
    let (service, events) = DiscoveryService::new(identity, quiet_config(tcp_port));
    let (discovery_port, _) = get_test_ports();
    let addr = service.start(discovery_port).await.expect("start discovery");
    assert_eq!(addr.port(), discovery_port);
    (service, loopback(addr.port()), events)
}

#[tokio::test]
async fn test_state_changes_are_tracked() {
    let (service, target, mut events) = started(5000).await;
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_id = Uuid::new_v4();

    peer.send_to(&announcement(peer_id, UserState::Online, false), target)
        .await
        .unwrap();
    assert!(matches!(
        recv_within(&mut events).await,
        DiscoveryEvent::UserDiscovered(user) if user.user_id == peer_id
    ));

    // Same state again: refreshed silently.
    peer.send_to(&announcement(peer_id, UserState::Online, true), target)
        .await
        .unwrap();
    peer.send_to(&announcement(peer_id, UserState::DoNotDisturb, true), target)
        .await
        .unwrap();
    assert_eq!(
        recv_within(&mut events).await,
        DiscoveryEvent::UserStateChanged {
            user_id: peer_id,
            state: UserState::DoNotDisturb
        }
    );
    assert!(service.is_user_online(&peer_id).await);

    peer.send_to(&announcement(peer_id, UserState::Invisible, true), target)
        .await
        .unwrap();
    assert_eq!(
        recv_within(&mut events).await,
        DiscoveryEvent::UserStateChanged {
            user_id: peer_id,
            state: UserState::Invisible
        }
    );
    assert!(service.discovered_users().await.is_empty());
    assert!(!service.is_user_online(&peer_id).await);
    assert_eq!(
        service.discovered_user(&peer_id).await.map(|u| u.state),
        Some(UserState::Invisible)
    );

    service.stop().await;
}

#[tokio::test]
async fn test_replies_are_not_answered() {
    let (service, target, mut events) = started(5001).await;
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_id = Uuid::new_v4();

    peer.send_to(&announcement(peer_id, UserState::Online, true), target)
        .await
        .unwrap();
    assert!(matches!(
        recv_within(&mut events).await,
        DiscoveryEvent::UserDiscovered(_)
    ));

    let mut buf = [0u8; 1024];
    let answered =
        tokio::time::timeout(Duration::from_millis(300), peer.recv_from(&mut buf)).await;
    assert!(answered.is_err(), "a reply must not be answered");

    service.stop().await;
}

#[tokio::test]
async fn test_answer_advertises_tcp_port_and_state() {
    let (service, target, mut events) = started(5002).await;
    service.set_user_state(UserState::DoNotDisturb);
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    peer.send_to(&announcement(Uuid::new_v4(), UserState::Online, false), target)
        .await
        .unwrap();
    let _ = recv_within(&mut events).await;

    let mut buf = [0u8; 1024];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .expect("answer in time")
        .unwrap();
    let answer: DiscoveryAnnouncement = serde_json::from_slice(&buf[..len]).unwrap();
    assert_eq!(answer.tcp_port, 5002);
    assert_eq!(answer.state, UserState::DoNotDisturb);
    assert_eq!(answer.nickname, "dave");
    assert!(answer.reply);

    service.stop().await;
    assert!(!service.is_running().await);
}
