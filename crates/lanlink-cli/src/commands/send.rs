//! Send command implementation.
//!
//! Connects to a running node, offers one file and streams it once accepted.
//! The node identifies itself right after the connection comes up; that id is
//! the receiver of the offer.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use lanlink_core::connection::{parse_host_address, Client, ClientConfig, ClientEvent};
use lanlink_core::contacts::ContactBook;
use lanlink_core::history::HistoryStore;
use lanlink_core::identity::UserIdentity;
use lanlink_core::transfer::{format_size, FileTransferManager, TransferEvent};

use super::link::{await_peer_identity, flush_and_disconnect, HANDSHAKE_TIMEOUT};
use super::SendArgs;
use crate::ui::percent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Rejected,
    Failed,
    Cancelled,
}

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();
    let addr = parse_host_address(&args.host).context("Invalid host")?;

    let identity = UserIdentity::from_config(&config.general);
    let local_id = identity.uuid;

    let contacts = Arc::new(RwLock::new(
        ContactBook::load().context("Failed to load contact book")?,
    ));
    let history =
        HistoryStore::load(config.history.clone()).context("Failed to load history")?;
    let (message_tx, mut notices) = mpsc::unbounded_channel();
    let (mut manager, mut transfers) = FileTransferManager::new(
        &config.transfer,
        config.general.resolved_download_dir(),
        contacts,
        Box::new(message_tx),
        Box::new(history),
    );
    manager.set_incognito_mode(config.history.incognito);

    if !args.quiet {
        println!();
        println!("LanLink v{}", lanlink_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  Connecting to {}...", addr);
    }

    let (mut client, mut events) = Client::new(identity, ClientConfig::from(&config.network));
    client.connect_to_server(addr);

    let (receiver_id, receiver_name) =
        tokio::time::timeout(HANDSHAKE_TIMEOUT, await_peer_identity(&mut events, addr))
            .await
            .context("Timed out waiting for the receiver to identify itself")??;

    let offered = manager.initiate_file_transfer(local_id, receiver_id, &args.file);
    while let Ok(notice) = notices.try_recv() {
        eprintln!("  {}", notice.content);
    }
    let request = offered.with_context(|| format!("Cannot send {}", args.file.display()))?;

    if !args.quiet {
        println!(
            "  Offering {} ({}) to {}",
            request.file_name,
            format_size(request.file_size),
            receiver_name
        );
        println!("  Waiting for the receiver to accept...");
    }

    let start_time = Instant::now();
    let mut last_percent = None;
    let mut outcome = None;

    while outcome.is_none() {
        let due = manager.wait_due();

        tokio::select! {
            Some(event) = transfers.recv() => {
                if let Some(frame) = event.to_network_message(local_id) {
                    if let Err(e) = client.send_message(frame) {
                        tracing::warn!("Frame not sent: {}", e);
                    }
                }

                match event {
                    TransferEvent::ResponseReceived(response) => {
                        if response.accepted {
                            if !args.quiet {
                                println!("  Accepted, sending...");
                            }
                        } else {
                            outcome = Some(Outcome::Rejected);
                        }
                    }
                    TransferEvent::Progress { bytes_transferred, total_bytes, .. } => {
                        let done = percent(bytes_transferred, total_bytes);
                        if !args.quiet && done % 10 == 0 && last_percent != Some(done) {
                            last_percent = Some(done);
                            println!(
                                "  {:>3}%  {} / {}",
                                done,
                                format_size(bytes_transferred),
                                format_size(total_bytes)
                            );
                        }
                    }
                    TransferEvent::Error { message, .. } => {
                        eprintln!("  Error: {}", message);
                    }
                    TransferEvent::Completed { success, .. } => {
                        outcome = Some(if success { Outcome::Sent } else { Outcome::Failed });
                    }
                    _ => {}
                }
            }
            Some(event) = events.recv() => match event {
                ClientEvent::MessageReceived(message) => {
                    if !manager.handle_message(&message) {
                        tracing::debug!(
                            message_type = ?message.message_type(),
                            "Ignoring non-transfer message"
                        );
                    }
                }
                ClientEvent::Disconnected => {
                    eprintln!("  Connection lost, reconnecting...");
                }
                ClientEvent::ConnectionError(e) => {
                    tracing::debug!("Reconnect failed: {}", e);
                }
                ClientEvent::Connected | ClientEvent::Reconnected => {}
            },
            () = due => manager.pump_due(tokio::time::Instant::now()),
            _ = tokio::signal::ctrl_c() => {
                let active: Vec<Uuid> = manager
                    .active_transfers()
                    .iter()
                    .map(|session| session.session_id())
                    .collect();
                for session_id in active {
                    manager.cancel_transfer(session_id);
                }
                outcome = Some(Outcome::Cancelled);
            }
        }
    }

    flush_and_disconnect(&mut client).await;

    match outcome.unwrap_or(Outcome::Failed) {
        Outcome::Sent => {
            if !args.quiet {
                println!();
                println!(
                    "  Sent {} in {:.1}s",
                    request.file_name,
                    start_time.elapsed().as_secs_f64()
                );
            }
            Ok(())
        }
        Outcome::Rejected => bail!("{} declined the file", receiver_name),
        Outcome::Failed => bail!("Transfer of {} failed", request.file_name),
        Outcome::Cancelled => {
            println!();
            println!("  Transfer cancelled.");
            Ok(())
        }
    }
}
