use thiserror::Error;

pub use gatecheck_ban_system::BanError;
pub use gatecheck_config::ConfigError;

use crate::host::Slot;

/// Failures of one admission. None of them is fatal to the host; each is
/// contained to the connection it happened on.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Could not resolve an identity for slot {slot} after {attempts} attempts")]
    IdentityUnresolved { slot: Slot, attempts: u32 },

    #[error("Ban store unavailable during {operation} for {identity}: {message}")]
    StoreUnavailable {
        identity: String,
        operation: &'static str,
        message: String,
    },

    #[error("Verdict for {expected} discarded, slot {slot} now holds {found:?}")]
    StaleSlotRace {
        slot: Slot,
        expected: String,
        found: Option<String>,
    },

    #[error("{action} failed for slot {slot}: {message}")]
    EnforcementSideEffect {
        slot: Slot,
        action: &'static str,
        message: String,
    },

    #[error("No Tokio runtime to check {identity} on slot {slot}, client left unchecked")]
    RuntimeUnavailable { slot: Slot, identity: String },

    #[error("Ban system error: {0}")]
    Ban(#[from] BanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl AdmissionError {
    pub fn side_effect(slot: Slot, action: &'static str, error: impl ToString) -> Self {
        Self::EnforcementSideEffect {
            slot,
            action,
            message: error.to_string(),
        }
    }
}

/// Error reported by the host for a session command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
