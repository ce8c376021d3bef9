//! Messages command implementation.

use anyhow::{Context, Result};

use lanlink_core::message::{Message, MessageKind, MessageStore};

use super::contacts::parse_id;
use super::MessagesArgs;
use crate::ui::{rule, truncate_string};

/// Run the messages command.
pub async fn run(args: MessagesArgs) -> Result<()> {
    let mut store = MessageStore::load().context("Failed to load messages")?;
    let contact = args.with.as_deref().map(parse_id).transpose()?;

    if args.clear {
        match contact {
            Some(id) => {
                if store.clear_conversation(&id).context("Failed to clear messages")? {
                    println!("Conversation with {} cleared.", id);
                } else {
                    println!("No conversation with {}.", id);
                }
            }
            None => {
                store.clear().context("Failed to clear messages")?;
                println!("Messages cleared.");
            }
        }
        return Ok(());
    }

    match contact {
        Some(id) => {
            let messages = store.conversation(&id).to_vec();
            if args.json {
                let output = serde_json::json!({ "contact": id, "messages": messages });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_conversation(&messages);
            }
            store
                .mark_conversation_read(&id)
                .context("Failed to mark messages read")?;
        }
        None => {
            let summary: Vec<_> = store
                .contacts()
                .into_iter()
                .map(|id| {
                    (
                        id,
                        store.conversation(&id).len(),
                        store.unread_count_for(&id),
                    )
                })
                .collect();

            if args.json {
                let conversations: Vec<_> = summary
                    .iter()
                    .map(|(id, total, unread)| {
                        serde_json::json!({ "contact": id, "messages": total, "unread": unread })
                    })
                    .collect();
                let output = serde_json::json!({
                    "unread": store.unread_count(),
                    "conversations": conversations,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }

            println!();
            println!("Conversations ({} unread):", store.unread_count());
            rule();
            if summary.is_empty() {
                println!("  (no messages)");
            }
            for (id, total, unread) in summary {
                println!("  {}  {:>5} messages  {:>4} unread", id, total, unread);
            }
            rule();
        }
    }
    Ok(())
}

fn print_conversation(messages: &[Message]) {
    println!();
    rule();
    if messages.is_empty() {
        println!("  (no messages)");
    }
    for message in messages {
        let marker = match message.kind {
            MessageKind::Text if message.read => ' ',
            MessageKind::Text => '*',
            _ => '-',
        };
        println!(
            "{} {}  {}  {}",
            marker,
            message.formatted_timestamp(),
            truncate_string(&message.sender_id.to_string(), 8),
            message.content
        );
    }
    rule();
}
