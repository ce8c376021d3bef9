//! Client/server behaviour over loopback.

mod common;

use std::time::Duration;

use lanlink_core::connection::{
    Client, ClientConfig, ClientEvent, ConnectionState, Server, ServerEvent,
};
use lanlink_core::identity::{UserIdentity, UserState};
use lanlink_core::protocol::{Content, NetworkMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

use common::{get_test_ports, loopback, recv_within};

fn fast_config() -> ClientConfig {
    ClientConfig {
        heartbeat_interval: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(100),
    }
}

async fn connected(
    server: &Server,
    server_events: &mut mpsc::UnboundedReceiver<ServerEvent>,
    name: &str,
) -> (Client, mpsc::UnboundedReceiver<ClientEvent>, Uuid) {
    let identity = UserIdentity::new(Uuid::new_v4(), name);
    let id = identity.uuid;
    let (client, mut events) = Client::new(identity, fast_config());
    client.connect_to_server(loopback(server.local_addr().port()));

    assert_eq!(recv_within(&mut events).await, ClientEvent::Connected);
    assert_eq!(
        recv_within(server_events).await,
        ServerEvent::ClientConnected(id)
    );
    let _ = recv_within(server_events).await;
    (client, events, id)
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (server, mut server_events) = Server::start(0).await.expect("server");
    let (_alice, mut alice_events, alice) = connected(&server, &mut server_events, "alice").await;
    let (_bob, mut bob_events, bob) = connected(&server, &mut server_events, "bob").await;

    let mut online = server.online_clients().await;
    online.sort();
    let mut expected = vec![alice, bob];
    expected.sort();
    assert_eq!(online, expected);

    let host = Uuid::new_v4();
    assert_eq!(server.broadcast_user_status(host, UserState::DoNotDisturb).await, 2);

    for events in [&mut alice_events, &mut bob_events] {
        match recv_within(events).await {
            ClientEvent::MessageReceived(message) => {
                assert_eq!(message.sender_id(), host);
                assert!(matches!(
                    message.content(),
                    Content::UserStatus(status) if status.state == UserState::DoNotDisturb
                ));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_status_update_from_client() {
    let (server, mut server_events) = Server::start(0).await.expect("server");
    let (alice, _alice_events, alice_id) = connected(&server, &mut server_events, "alice").await;

    alice
        .send_user_status(UserState::Invisible)
        .expect("connected");
    match recv_within(&mut server_events).await {
        ServerEvent::MessageReceived { client_id, message } => {
            assert_eq!(client_id, alice_id);
            assert_eq!(
                message.content(),
                &Content::UserStatus(lanlink_core::protocol::UserStatusPayload {
                    user_id: alice_id,
                    state: UserState::Invisible,
                })
            );
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_client_reconnects_after_server_restart() {
    let (_, tcp_port) = get_test_ports();
    let (server, mut server_events) = Server::start(tcp_port).await.expect("server");
    let identity = UserIdentity::new(Uuid::new_v4(), "alice");
    let id = identity.uuid;

    let (mut client, mut events) = Client::new(identity, fast_config());
    client.connect_to_server(loopback(tcp_port));
    assert_eq!(recv_within(&mut events).await, ClientEvent::Connected);
    assert_eq!(
        recv_within(&mut server_events).await,
        ServerEvent::ClientConnected(id)
    );

    server.stop().await;
    drop(server);
    assert_eq!(recv_within(&mut events).await, ClientEvent::Disconnected);
    let state = tokio::time::timeout(
        Duration::from_secs(5),
        client.wait_for_state(|s| s != ConnectionState::Connected),
    )
    .await
    .expect("state in time");
    assert!(matches!(
        state,
        Some(ConnectionState::Reconnecting | ConnectionState::Connecting)
    ));

    let (_server, mut server_events) = Server::start(tcp_port).await.expect("restart");
    loop {
        match recv_within(&mut events).await {
            ClientEvent::Reconnected => break,
            ClientEvent::ConnectionError(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(
        recv_within(&mut server_events).await,
        ServerEvent::ClientConnected(id)
    );
    assert!(client.is_connected());

    client
        .send_message(NetworkMessage::chat(id, Uuid::new_v4(), "back again"))
        .expect("connected");
    let _ = recv_within(&mut server_events).await;
    match recv_within(&mut server_events).await {
        ServerEvent::MessageReceived { message, .. } => {
            assert!(matches!(
                message.content(),
                Content::ChatMessage(chat) if chat.text == "back again"
            ));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_while_connected_is_ignored() {
    let (server, mut server_events) = Server::start(0).await.expect("server");
    let (alice, mut alice_events, alice_id) =
        connected(&server, &mut server_events, "alice").await;
    let first = alice.server_addr();

    alice.connect_to_server(loopback(server.local_addr().port()));
    alice.connect_to_server(loopback(1));

    let quiet = Duration::from_millis(300);
    assert!(tokio::time::timeout(quiet, alice_events.recv()).await.is_err());
    assert!(tokio::time::timeout(quiet, server_events.recv()).await.is_err());
    assert!(alice.is_connected());
    assert_eq!(alice.server_addr(), first);
    assert_eq!(server.online_clients().await, vec![alice_id]);
}

#[tokio::test]
async fn test_send_to_unknown_client_reports_failure() {
    let (server, mut server_events) = Server::start(0).await.expect("server");
    let (_alice, mut alice_events, alice_id) =
        connected(&server, &mut server_events, "alice").await;

    let host = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    assert!(
        !server
            .send_to(stranger, &NetworkMessage::chat(host, stranger, "anyone?"))
            .await
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(200), alice_events.recv())
            .await
            .is_err()
    );

    assert!(
        server
            .send_to(alice_id, &NetworkMessage::chat(host, alice_id, "hi alice"))
            .await
    );
    match recv_within(&mut alice_events).await {
        ClientEvent::MessageReceived(message) => assert!(matches!(
            message.content(),
            Content::ChatMessage(chat) if chat.text == "hi alice"
        )),
        other => panic!("unexpected event {other:?}"),
    }
}
