use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    error::HostError,
    host::{DisconnectReason, JoinNotice, SessionHost, SessionInfo, Slot},
};

#[derive(Debug, Default)]
struct MockState {
    sessions: HashMap<Slot, SessionInfo>,
    disconnects: Vec<(Slot, DisconnectReason)>,
    cleared: Vec<String>,
    notices: Vec<(Slot, JoinNotice)>,
    failing_disconnects: u32,
}

/// In-memory host that records every command it receives.
#[derive(Debug, Clone, Default)]
pub struct MockSessionHost {
    state: Arc<RwLock<MockState>>,
}

impl MockSessionHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&MockState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Attaches an authenticated client to `slot`.
    pub fn join(&self, slot: Slot, identity: &str, address: Option<&str>) {
        self.set_session(
            slot,
            SessionInfo {
                identity: Some(identity.to_string()),
                name: format!("player{slot}"),
                address: address.map(str::to_string),
                is_bot: false,
                is_valid: true,
            },
        );
    }

    pub fn set_session(&self, slot: Slot, session: SessionInfo) {
        self.write(|state| state.sessions.insert(slot, session));
    }

    pub fn leave(&self, slot: Slot) {
        self.write(|state| state.sessions.remove(&slot));
    }

    /// The next `count` disconnect commands fail.
    pub fn fail_disconnects(&self, count: u32) {
        self.write(|state| state.failing_disconnects = count);
    }

    pub fn disconnects(&self) -> Vec<(Slot, DisconnectReason)> {
        self.read(|state| state.disconnects.clone())
    }

    pub fn cleared(&self) -> Vec<String> {
        self.read(|state| state.cleared.clone())
    }

    pub fn notices(&self) -> Vec<(Slot, JoinNotice)> {
        self.read(|state| state.notices.clone())
    }
}

impl SessionHost for MockSessionHost {
    fn session(&self, slot: Slot) -> Option<SessionInfo> {
        self.read(|state| state.sessions.get(&slot).cloned())
    }

    fn disconnect(&self, slot: Slot, reason: DisconnectReason) -> Result<(), HostError> {
        self.write(|state| {
            if state.failing_disconnects > 0 {
                state.failing_disconnects -= 1;
                return Err(HostError::new("kick command rejected"));
            }
            state.disconnects.push((slot, reason));
            state.sessions.remove(&slot);
            Ok(())
        })
    }

    fn clear_ban_list(&self, identity: &str) -> Result<(), HostError> {
        self.write(|state| state.cleared.push(identity.to_string()));
        Ok(())
    }

    fn notify(&self, slot: Slot, notice: JoinNotice) {
        self.write(|state| state.notices.push((slot, notice)));
    }
}
