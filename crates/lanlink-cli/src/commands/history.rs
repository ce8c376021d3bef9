//! History command implementation.

use anyhow::{Context, Result};

use lanlink_core::history::{HistoryStore, TransferRecord};
use lanlink_core::transfer::{format_size, TransferDirection};

use super::HistoryArgs;
use crate::ui::{rule, truncate_string};

/// Run the history command.
pub async fn run(args: HistoryArgs) -> Result<()> {
    let config = super::load_config();
    let mut store = HistoryStore::load(config.history).context("Failed to load history")?;

    if args.clear {
        store.clear().context("Failed to clear history")?;
        println!("History cleared.");
        return Ok(());
    }

    let records = store.list(args.limit);

    if args.json {
        let output = serde_json::json!({ "transfers": records });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("Recent Transfers:");
    rule();
    println!(
        "  {:19}  {:9}  {:20}  {:10}  {:6}",
        "Date", "Direction", "File", "Size", "Result"
    );
    rule();

    if records.is_empty() {
        println!("  (no transfer history)");
    }
    for record in records {
        print_record(record);
    }

    rule();
    Ok(())
}

fn print_record(record: &TransferRecord) {
    let direction = match record.direction {
        TransferDirection::Send => "sent",
        TransferDirection::Receive => "received",
    };
    println!(
        "  {:19}  {:9}  {:20}  {:10}  {:6}",
        record.formatted_timestamp(),
        direction,
        truncate_string(&record.file_name, 20),
        format_size(record.file_size),
        if record.success { "ok" } else { "failed" }
    );
}
