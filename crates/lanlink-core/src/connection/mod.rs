//! TCP connection layer.
//!
//! Both ends speak the framed protocol from [`crate::protocol`]:
//!
//! - [`Client`] makes one outbound connection, identifies itself, sends
//!   heartbeats and reconnects after a flat delay when the link drops.
//! - [`Server`] accepts any number of inbound connections and keys each one
//!   by the sender id of the first frame it carries.
//!
//! Heartbeat frames are transport liveness only and never reach the caller.

mod client;
mod server;

pub use client::{Client, ClientConfig, ClientEvent, ConnectionState};
pub use server::{Server, ServerEvent};

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Enable TCP keep-alive so half-open links are eventually noticed.
fn configure_tcp_keepalive(stream: &TcpStream) {
    use socket2::{SockRef, TcpKeepalive};

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!("Failed to enable TCP keep-alive: {}", e);
    }
}

/// Parse `IP`, `IP:PORT`, `[IPv6]` or `[IPv6]:PORT`.
///
/// A missing port means [`crate::DEFAULT_TCP_PORT`].
///
/// # Examples
///
/// ```
/// use lanlink_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100").unwrap();
/// assert_eq!(addr.port(), 8888);
///
/// let addr = parse_host_address("192.168.1.100:9000").unwrap();
/// assert_eq!(addr.port(), 9000);
/// ```
///
/// # Errors
///
/// Returns `Error::InvalidInput` if the string is not an address.
pub fn parse_host_address(host: &str) -> Result<SocketAddr> {
    let host = host.trim();
    let invalid = || {
        Error::InvalidInput(format!(
            "invalid host '{host}', expected IP or IP:PORT (e.g. 192.168.1.100:8888)"
        ))
    };

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, crate::DEFAULT_TCP_PORT));
    }

    match host.rsplit_once(':') {
        Some((ip, port)) if !ip.contains(':') => {
            let ip: IpAddr = ip.parse().map_err(|_| invalid())?;
            let port: u16 = port.parse().map_err(|_| {
                Error::InvalidInput(format!("invalid port '{port}', expected 1-65535"))
            })?;
            Ok(SocketAddr::new(ip, port))
        }
        _ => Err(invalid()),
    }
}
