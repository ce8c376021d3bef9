//! Peers command implementation.

use anyhow::{Context, Result};

use lanlink_core::discovery::{DiscoveredUser, DiscoveryConfig, DiscoveryService};
use lanlink_core::identity::{UserIdentity, UserState};

use super::PeersArgs;
use crate::ui::{parse_duration, rule, state_label, truncate_string};

/// Run the peers command.
pub async fn run(args: PeersArgs) -> Result<()> {
    let config = super::load_config();

    let duration = parse_duration(&args.duration)
        .context("Invalid duration format. Use formats like '5s', '10s', '30s'")?;

    if !args.json {
        println!();
        println!("Listening for peers ({})...", args.duration);
        println!();
    }

    let identity = UserIdentity::from_config(&config.general);
    let (discovery, _events) =
        DiscoveryService::new(identity, DiscoveryConfig::from(&config.network));
    // Announce as invisible so a scan does not show up in other peers' lists.
    discovery.set_user_state(UserState::Invisible);
    discovery
        .start(config.network.discovery_port)
        .await
        .context("Failed to start discovery")?;

    tokio::time::sleep(duration).await;

    let mut users = discovery.discovered_users().await;
    discovery.stop().await;
    users.sort_by(|a, b| a.nickname.cmp(&b.nickname));

    if args.json {
        output_json(&users)?;
    } else {
        display_users(&users);
    }
    Ok(())
}

fn output_json(users: &[DiscoveredUser]) -> Result<()> {
    let output = serde_json::json!({
        "peers": users.iter().map(|u| serde_json::json!({
            "user_id": u.user_id.to_string(),
            "nickname": u.nickname,
            "state": state_label(u.state),
            "address": u.tcp_addr().to_string(),
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn display_users(users: &[DiscoveredUser]) {
    println!("Peers on Network:");
    rule();
    println!("  {:16}  {:9}  {:21}  {}", "Nickname", "State", "Address", "User ID");
    rule();

    if users.is_empty() {
        println!("  (no peers found)");
    }
    for user in users {
        println!(
            "  {:16}  {:9}  {:21}  {}",
            truncate_string(&user.nickname, 16),
            state_label(user.state),
            user.tcp_addr().to_string(),
            user.user_id
        );
    }
    rule();
}
