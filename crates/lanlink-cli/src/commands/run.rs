//! Run command implementation.
//!
//! A node announces itself over UDP, accepts TCP connections and handles
//! incoming transfer offers until interrupted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use lanlink_core::connection::{Server, ServerEvent};
use lanlink_core::contacts::{ContactBook, ContactInfo};
use lanlink_core::discovery::{DiscoveryConfig, DiscoveryEvent, DiscoveryService};
use lanlink_core::history::HistoryStore;
use lanlink_core::identity::UserIdentity;
use lanlink_core::message::{Message, MessageStore};
use lanlink_core::protocol::{Content, NetworkMessage};
use lanlink_core::transfer::{format_size, FileTransferManager, TransferEvent};

use super::RunArgs;
use crate::ui::{percent, state_label};

/// Run the run command.
#[allow(clippy::too_many_lines)]
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(port) = args.port {
        config.network.tcp_port = port;
    }
    if let Some(port) = args.discovery_port {
        config.network.discovery_port = port;
    }

    let identity = UserIdentity::from_config(&config.general);
    let local_id = identity.uuid;
    let download_dir = config.general.resolved_download_dir();

    let (server, mut server_events) = Server::start(config.network.tcp_port)
        .await
        .context("Failed to start TCP server")?;

    let mut discovery_config = DiscoveryConfig::from(&config.network);
    discovery_config.tcp_port = server.local_addr().port();
    let (discovery, mut peers) = DiscoveryService::new(identity.clone(), discovery_config);
    discovery
        .start(config.network.discovery_port)
        .await
        .context("Failed to start discovery")?;

    let contacts = Arc::new(RwLock::new(
        ContactBook::load().context("Failed to load contact book")?,
    ));
    let history =
        HistoryStore::load(config.history.clone()).context("Failed to load history")?;
    let mut conversations = MessageStore::load().context("Failed to load messages")?;
    conversations
        .set_incognito(config.history.incognito)
        .context("Failed to apply incognito mode")?;
    let (message_tx, mut notices) = mpsc::unbounded_channel::<Message>();
    let (mut manager, mut transfers) = FileTransferManager::new(
        &config.transfer,
        download_dir.clone(),
        contacts.clone(),
        Box::new(message_tx),
        Box::new(history),
    );
    manager.set_incognito_mode(config.history.incognito);

    println!();
    println!("LanLink v{}", lanlink_core::VERSION);
    println!("{}", "-".repeat(37));
    println!("  Nickname:  {}", identity.nickname);
    println!("  User ID:   {}", local_id);
    println!("  Listening: {}", server.local_addr());
    println!("  Downloads: {}", download_dir.display());
    if args.accept_all {
        println!("  Accepting files from everyone not blacklisted");
    }
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    let mut progress: HashMap<Uuid, u64> = HashMap::new();

    loop {
        let due = manager.wait_due();

        tokio::select! {
            Some(event) = peers.recv() => {
                on_discovery_event(&event, &contacts);
            }
            Some(event) = server_events.recv() => match event {
                ServerEvent::ClientConnected(client_id) => {
                    let addr = server
                        .client_addr(client_id)
                        .await
                        .map_or_else(|| "?".to_string(), |a| a.to_string());
                    println!("  + {} connected from {}", client_id, addr);
                    server
                        .send_to(client_id, &NetworkMessage::user_discovery(&identity))
                        .await;
                }
                ServerEvent::ClientDisconnected(client_id) => {
                    println!("  - {} disconnected", client_id);
                }
                ServerEvent::MessageReceived { client_id, message } => {
                    if !manager.handle_message(&message) {
                        on_message(client_id, &message, &mut conversations);
                    }
                }
            },
            Some(event) = transfers.recv() => {
                if let (Some(frame), Some(destination)) =
                    (event.to_network_message(local_id), event.destination())
                {
                    if !server.send_to(destination, &frame).await {
                        tracing::warn!(%destination, "Peer is not connected, dropping frame");
                    }
                }

                match event {
                    TransferEvent::RequestReceived(request) => {
                        if args.accept_all {
                            let save_path = request.save_path_in(&download_dir);
                            println!(
                                "  Accepting {} ({}) from {}",
                                request.file_name,
                                format_size(request.file_size),
                                request.sender_id
                            );
                            manager.accept_file_transfer(&request, save_path);
                        } else {
                            println!(
                                "  Declining {} from {} (not whitelisted; see --accept-all)",
                                request.file_name, request.sender_id
                            );
                            manager.reject_file_transfer(&request);
                        }
                    }
                    TransferEvent::ResponseSent { response, .. } if response.accepted => {
                        println!("  Receiving into {}", response.save_path.display());
                    }
                    TransferEvent::Progress { session_id, bytes_transferred, total_bytes } => {
                        let done = percent(bytes_transferred, total_bytes);
                        let last = progress.insert(session_id, done);
                        if done % 25 == 0 && last != Some(done) {
                            println!("  {:>3}%  {}", done, session_id);
                        }
                    }
                    TransferEvent::Error { session_id, message } => {
                        eprintln!("  ! {}: {}", session_id, message);
                    }
                    TransferEvent::Completed { session_id, success } => {
                        progress.remove(&session_id);
                        if success {
                            println!("  Transfer {} complete", session_id);
                        } else {
                            println!("  Transfer {} failed", session_id);
                        }
                    }
                    _ => {}
                }
            }
            Some(notice) = notices.recv() => {
                println!("  [{}] {}", notice.receiver_id, notice.content);
                if let Err(e) = conversations.add(notice.receiver_id, notice) {
                    tracing::warn!("Failed to store notice: {}", e);
                }
            }
            () = due => manager.pump_due(tokio::time::Instant::now()),
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  Shutting down...");
                break;
            }
        }
    }

    discovery.stop().await;
    server.stop().await;
    Ok(())
}

fn on_discovery_event(event: &DiscoveryEvent, contacts: &RwLock<ContactBook>) {
    match event {
        DiscoveryEvent::UserDiscovered(user) => {
            println!(
                "  * {} ({}) is {} at {}",
                user.nickname,
                user.user_id,
                state_label(user.state),
                user.tcp_addr()
            );
            remember(contacts, user.user_id, &user.nickname, user.state);
        }
        DiscoveryEvent::UserStateChanged { user_id, state } => {
            println!("  * {} is now {}", user_id, state_label(*state));
            if let Ok(mut book) = contacts.write() {
                if let Some(contact) = book.contact_mut(user_id) {
                    contact.mark_seen(*state);
                }
            }
        }
        DiscoveryEvent::UserLost(user_id) => {
            println!("  * {} went offline", user_id);
        }
    }
}

/// Refresh a known contact's last-seen details.
fn remember(
    contacts: &RwLock<ContactBook>,
    user_id: Uuid,
    nickname: &str,
    state: lanlink_core::identity::UserState,
) {
    let Ok(mut book) = contacts.write() else {
        return;
    };
    match book.contact_mut(&user_id) {
        Some(contact) => {
            contact.nickname = nickname.to_string();
            contact.mark_seen(state);
        }
        None => {
            let mut contact = ContactInfo::new(user_id, nickname);
            contact.mark_seen(state);
            book.add_contact(contact);
        }
    }
    if let Err(e) = book.save() {
        tracing::warn!("Failed to save contact book: {}", e);
    }
}

fn on_message(client_id: Uuid, message: &NetworkMessage, conversations: &mut MessageStore) {
    match message.content() {
        Content::ChatMessage(chat) => {
            println!("  <{}> {}", client_id, chat.text);
            if let Some(entry) = Message::from_network(message) {
                if let Err(e) = conversations.record_received(entry) {
                    tracing::warn!("Failed to store message: {}", e);
                }
            }
        }
        Content::UserStatus(status) => {
            println!("  * {} is now {}", status.user_id, state_label(status.state));
        }
        Content::UserDiscovery(peer) => {
            println!("  * {} identified as {} ({})", client_id, peer.nickname, peer.device_info);
        }
        _ => {
            tracing::debug!(message_type = ?message.message_type(), "Ignoring message");
        }
    }
}
