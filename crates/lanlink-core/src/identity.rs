//! Local user identity and presence state.
//!
//! The user id defaults to a name-based UUID derived from the hostname, so a
//! machine keeps the same id across restarts without any stored state.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GeneralConfig;

/// Self-reported presence state, encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum UserState {
    /// Available
    #[default]
    Online = 0,
    /// Reachable, but chat should not interrupt
    DoNotDisturb = 1,
    /// Connected but hidden from peer lists
    Invisible = 2,
}

impl UserState {
    /// Parse a state from its wire value.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Online),
            1 => Some(Self::DoNotDisturb),
            2 => Some(Self::Invisible),
            _ => None,
        }
    }
}

impl From<UserState> for u8 {
    fn from(state: UserState) -> Self {
        state as Self
    }
}

impl TryFrom<u8> for UserState {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_byte(value).ok_or_else(|| format!("unknown user state: {value}"))
    }
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::DoNotDisturb => write!(f, "Do not disturb"),
            Self::Invisible => write!(f, "Invisible"),
        }
    }
}

/// Who this node is on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Stable user id
    pub uuid: Uuid,
    /// Display name
    pub nickname: String,
    /// Human-readable host description
    pub device_info: String,
}

impl UserIdentity {
    /// Create an identity with an explicit id.
    #[must_use]
    pub fn new(uuid: Uuid, nickname: impl Into<String>) -> Self {
        Self {
            uuid,
            nickname: nickname.into(),
            device_info: device_info(),
        }
    }

    /// Build the local identity from configuration.
    #[must_use]
    pub fn from_config(general: &GeneralConfig) -> Self {
        let uuid = general.user_id.unwrap_or_else(host_user_id);
        Self::new(uuid, general.nickname.clone())
    }
}

/// Name-based id for this host.
#[must_use]
pub fn host_user_id() -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, hostname_string().as_bytes())
}

fn hostname_string() -> String {
    hostname::get().map_or_else(
        |_| "localhost".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}

fn device_info() -> String {
    format!("{} ({})", hostname_string(), std::env::consts::OS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_state_wire_values() {
        assert_eq!(serde_json::to_string(&UserState::Online).unwrap(), "0");
        assert_eq!(serde_json::to_string(&UserState::Invisible).unwrap(), "2");

        let state: UserState = serde_json::from_str("1").unwrap();
        assert_eq!(state, UserState::DoNotDisturb);

        assert!(serde_json::from_str::<UserState>("9").is_err());
    }

    #[test]
    fn test_host_user_id_is_stable() {
        assert_eq!(host_user_id(), host_user_id());
        assert!(!host_user_id().is_nil());
    }

    #[test]
    fn test_identity_from_config() {
        let fixed = Uuid::new_v4();
        let general = GeneralConfig {
            nickname: "Carol".to_string(),
            user_id: Some(fixed),
            download_dir: None,
        };

        let identity = UserIdentity::from_config(&general);
        assert_eq!(identity.uuid, fixed);
        assert_eq!(identity.nickname, "Carol");
        assert!(identity.device_info.contains(std::env::consts::OS));

        let derived = UserIdentity::from_config(&GeneralConfig {
            user_id: None,
            ..general
        });
        assert_eq!(derived.uuid, host_user_id());
    }
}
