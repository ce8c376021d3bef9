//! Contacts command implementation.

use anyhow::{Context, Result};
use uuid::Uuid;

use lanlink_core::contacts::ContactBook;

use super::{ContactsAction, ContactsArgs};
use crate::ui::{rule, state_label, truncate_string};

/// Run the contacts command.
pub async fn run(args: ContactsArgs) -> Result<()> {
    let mut book = ContactBook::load().context("Failed to load contact book")?;

    match args.action {
        ContactsAction::List => {
            list(&book);
            return Ok(());
        }
        ContactsAction::Block { id } => {
            let id = parse_id(&id)?;
            book.add_to_blacklist(id);
            println!("Blocked {}.", id);
        }
        ContactsAction::Allow { id } => {
            let id = parse_id(&id)?;
            book.add_to_whitelist(id);
            println!("Allowed {}; their files will be accepted automatically.", id);
        }
        ContactsAction::Remove { id } => {
            let id = parse_id(&id)?;
            let known = book.remove_contact(&id);
            book.remove_from_blacklist(&id);
            book.remove_from_whitelist(&id);
            if known {
                println!("Removed {}.", id);
            } else {
                println!("{} is not a contact; cleared from both lists.", id);
            }
        }
    }

    book.save().context("Failed to save contact book")?;
    Ok(())
}

pub(super) fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id.trim()).with_context(|| format!("'{}' is not a valid user id", id))
}

fn list(book: &ContactBook) {
    println!();
    println!("Contacts:");
    rule();
    if book.is_empty() {
        println!("  (no contacts)");
    }
    for contact in book.list() {
        let trust = if book.blacklist().contains(&contact.id) {
            "blocked"
        } else if book.whitelist().contains(&contact.id) {
            "allowed"
        } else {
            ""
        };
        println!(
            "  {:16}  {:36}  {:9}  {}",
            truncate_string(&contact.nickname, 16),
            contact.id,
            state_label(contact.last_known_state),
            trust
        );
    }
    rule();

    println!("Blacklist:");
    for id in book.blacklist() {
        println!("  {}", id);
    }
    println!("Whitelist:");
    for id in book.whitelist() {
        println!("  {}", id);
    }
    println!();
}
