//! Chat command implementation.
//!
//! Connects to a running node, sends one line of text and keeps a copy in
//! the local conversation with that user.

use anyhow::{Context, Result};

use lanlink_core::connection::{parse_host_address, Client, ClientConfig};
use lanlink_core::contacts::{ContactBook, ContactPolicy};
use lanlink_core::identity::{UserIdentity, UserState};
use lanlink_core::message::{ensure_deliverable, Message, MessageStore};

use super::link::{await_peer_identity, flush_and_disconnect, HANDSHAKE_TIMEOUT};
use super::ChatArgs;

/// Run the chat command.
pub async fn run(args: ChatArgs) -> Result<()> {
    let config = super::load_config();
    let addr = parse_host_address(&args.host).context("Invalid host")?;
    if args.text.trim().is_empty() {
        anyhow::bail!("Nothing to send");
    }

    let identity = UserIdentity::from_config(&config.general);
    let local_id = identity.uuid;
    let contacts = ContactBook::load().context("Failed to load contact book")?;
    let mut store = MessageStore::load().context("Failed to load messages")?;
    store
        .set_incognito(config.history.incognito)
        .context("Failed to apply incognito mode")?;

    let (mut client, mut events) = Client::new(identity, ClientConfig::from(&config.network));
    client.connect_to_server(addr);

    let (receiver_id, receiver_name) =
        tokio::time::timeout(HANDSHAKE_TIMEOUT, await_peer_identity(&mut events, addr))
            .await
            .context("Timed out waiting for the node to identify itself")??;

    let message = Message::text(local_id, receiver_id, args.text);
    let state = contacts
        .get_contact(&receiver_id)
        .map_or(UserState::Online, |contact| contact.last_known_state);

    let sent = ensure_deliverable(&message, state)
        .and_then(|()| client.send_message(message.to_network()));
    flush_and_disconnect(&mut client).await;
    sent.with_context(|| format!("Cannot message {}", receiver_name))?;

    store
        .record_sent(message)
        .context("Failed to store sent message")?;
    if !args.quiet {
        println!("Sent to {} ({}).", receiver_name, receiver_id);
    }
    Ok(())
}
