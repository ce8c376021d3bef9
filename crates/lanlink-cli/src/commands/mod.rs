//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or is rejected, it falls back to defaults.
pub fn load_config() -> lanlink_core::config::Config {
    lanlink_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("{}; using defaults", e);
        lanlink_core::config::Config::default()
    })
}

pub mod chat;
pub mod contacts;
pub mod history;
mod link;
pub mod messages;
pub mod peers;
pub mod run;
pub mod send;

/// LanLink - peer-to-peer messaging and file transfer on a LAN
#[derive(Parser)]
#[command(name = "lanlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run a node: announce presence, accept connections and transfers
    Run(RunArgs),

    /// Listen for peer announcements and list who is online
    Peers(PeersArgs),

    /// Send a file to a running node
    Send(SendArgs),

    /// Send a chat message to a running node
    Chat(ChatArgs),

    /// Read or clear stored conversations
    Messages(MessagesArgs),

    /// View or clear transfer history
    History(HistoryArgs),

    /// Manage contacts and the blacklist/whitelist
    Contacts(ContactsArgs),
}

/// Arguments for the run command
#[derive(Parser)]
pub struct RunArgs {
    /// Accept offers from senders that are not whitelisted
    #[arg(long)]
    pub accept_all: bool,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// UDP port for presence announcements
    #[arg(long)]
    pub discovery_port: Option<u16>,
}

/// Arguments for the peers command
#[derive(Parser)]
pub struct PeersArgs {
    /// How long to listen (e.g., 5s, 10s)
    #[arg(short, long, default_value = "5s")]
    pub duration: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Receiver address as IP or IP:PORT
    pub host: String,

    /// File to send
    pub file: PathBuf,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the chat command
#[derive(Parser)]
pub struct ChatArgs {
    /// Receiver address as IP or IP:PORT
    pub host: String,

    /// Message text
    pub text: String,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the messages command
#[derive(Parser)]
pub struct MessagesArgs {
    /// Show only the conversation with this user id
    #[arg(short, long)]
    pub with: Option<String>,

    /// Clear the selected conversation, or every conversation
    #[arg(long)]
    pub clear: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the history command
#[derive(Parser)]
pub struct HistoryArgs {
    /// Clear history
    #[arg(long)]
    pub clear: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show at most this many entries
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for the contacts command
#[derive(Parser)]
pub struct ContactsArgs {
    /// Contacts subcommand
    #[command(subcommand)]
    pub action: ContactsAction,
}

/// Contacts subcommands
#[derive(Subcommand)]
pub enum ContactsAction {
    /// List contacts and both trust lists
    List,

    /// Blacklist a user: their offers are rejected and nothing is sent to them
    Block {
        /// User id
        id: String,
    },

    /// Whitelist a user: their offers are accepted automatically
    Allow {
        /// User id
        id: String,
    },

    /// Remove a user from the contacts and both lists
    Remove {
        /// User id
        id: String,
    },
}
