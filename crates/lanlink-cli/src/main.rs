//! LanLink CLI - peer-to-peer messaging and file transfer on a LAN
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a node that accepts files from anyone
//! lanlink run --accept-all
//!
//! # See who is around
//! lanlink peers
//!
//! # Send a file (on another device)
//! lanlink send 192.168.1.20 ./report.pdf
//!
//! # Say hello, then read the replies
//! lanlink chat 192.168.1.20 "hello"
//! lanlink messages
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => commands::run::run(args).await,
        Command::Peers(args) => commands::peers::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Chat(args) => commands::chat::run(args).await,
        Command::Messages(args) => commands::messages::run(args).await,
        Command::History(args) => commands::history::run(args).await,
        Command::Contacts(args) => commands::contacts::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lanlink=info,lanlink_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
