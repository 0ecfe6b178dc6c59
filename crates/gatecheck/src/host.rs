//! What the admission pipeline needs from the game server hosting it.
//!
//! Every method is called from the main update path only, never from a
//! worker task.

use std::fmt;

use crate::error::HostError;

/// Connection slot index. Reused by the host once a client leaves.
pub type Slot = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Platform identity; `None` or `"0"` until the client is authenticated.
    pub identity: Option<String>,
    pub name: String,
    /// Address with the port already stripped.
    pub address: Option<String>,
    pub is_bot: bool,
    pub is_valid: bool,
}

impl SessionInfo {
    /// The identity, if it is present and not a placeholder.
    pub fn resolved_identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|id| is_well_formed(id))
    }

    /// Real, fully constructed participant.
    pub fn qualifies(&self) -> bool {
        self.is_valid && !self.is_bot
    }
}

pub fn is_well_formed(identity: &str) -> bool {
    let identity = identity.trim();
    !identity.is_empty() && !identity.chars().all(|c| c == '0')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Banned,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Banned => "banned",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-time notice for an admitted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinNotice {
    /// An elapsed ban was marked expired during this admission.
    ExpiryProcessed,
    CheckEnabled,
}

pub trait SessionHost {
    /// Live session behind `slot`, or `None` when absent or still being constructed.
    fn session(&self, slot: Slot) -> Option<SessionInfo>;

    fn disconnect(&self, slot: Slot, reason: DisconnectReason) -> Result<(), HostError>;

    /// Drops the host's own ban list entry for `identity`. Repeating it is harmless.
    fn clear_ban_list(&self, identity: &str) -> Result<(), HostError>;

    fn notify(&self, slot: Slot, notice: JoinNotice);
}

/// Strips the port from a raw remote address (`1.2.3.4:27005`, `[::1]:27005`).
pub fn strip_port(raw: &str) -> Option<String> {
    let raw = raw.trim();

    let host = if let Some(rest) = raw.strip_prefix('[') {
        rest.split(']').next().unwrap_or_default()
    } else if raw.matches(':').count() == 1 {
        raw.split(':').next().unwrap_or_default()
    } else {
        // Bare IPv6 or no port at all
        raw
    };

    Some(host.trim().to_string()).filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("1.2.3.4:27005").as_deref(), Some("1.2.3.4"));
        assert_eq!(strip_port("1.2.3.4").as_deref(), Some("1.2.3.4"));
        assert_eq!(strip_port("[2001:db8::1]:27005").as_deref(), Some("2001:db8::1"));
        assert_eq!(strip_port("2001:db8::1").as_deref(), Some("2001:db8::1"));
        assert_eq!(strip_port(""), None);
        assert_eq!(strip_port(":27005"), None);
    }

    #[test]
    fn test_identity_well_formed() {
        assert!(is_well_formed("76561198000000001"));
        assert!(!is_well_formed("0"));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("  "));
    }

    #[test]
    fn test_session_qualifies() {
        let mut session = SessionInfo {
            identity: Some("0".to_string()),
            name: "player".to_string(),
            address: None,
            is_bot: false,
            is_valid: true,
        };
        assert!(session.qualifies());
        assert_eq!(session.resolved_identity(), None);

        session.identity = Some("76561198000000001".to_string());
        assert_eq!(session.resolved_identity(), Some("76561198000000001"));

        session.is_bot = true;
        assert!(!session.qualifies());
    }
}
