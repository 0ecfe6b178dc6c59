//! Per-slot admission state.
//!
//! Slots are reused by the host, so every occupation gets a fresh generation.
//! Work scheduled for a slot carries a [`SlotTicket`]; a ticket whose
//! generation no longer matches belongs to a client that already left.

use crate::host::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotTicket {
    pub slot: Slot,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionState {
    Connecting,
    Resolving { attempt: u32 },
    Evaluating { identity: String },
    Admitted { identity: String },
    Blocked { identity: String },
    /// Identity never became available; the client stays connected.
    Unresolved,
    /// The slot changed hands before the verdict arrived.
    Discarded,
}

#[derive(Debug, Clone)]
struct SlotEntry {
    generation: u64,
    address: Option<String>,
    state: AdmissionState,
}

#[derive(Debug, Default)]
pub struct SlotTable {
    entries: Vec<Option<SlotEntry>>,
    next_generation: u64,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new occupation of `slot`, replacing whatever was there.
    pub fn occupy(&mut self, slot: Slot, address: Option<String>) -> SlotTicket {
        self.next_generation += 1;
        let generation = self.next_generation;

        let index = slot as usize;
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(SlotEntry {
            generation,
            address,
            state: AdmissionState::Connecting,
        });

        SlotTicket { slot, generation }
    }

    pub fn release(&mut self, slot: Slot) -> Option<AdmissionState> {
        self.entries
            .get_mut(slot as usize)
            .and_then(Option::take)
            .map(|entry| entry.state)
    }

    fn entry(&self, slot: Slot) -> Option<&SlotEntry> {
        self.entries.get(slot as usize).and_then(Option::as_ref)
    }

    fn current_mut(&mut self, ticket: SlotTicket) -> Option<&mut SlotEntry> {
        self.entries
            .get_mut(ticket.slot as usize)
            .and_then(Option::as_mut)
            .filter(|entry| entry.generation == ticket.generation)
    }

    pub fn is_current(&self, ticket: SlotTicket) -> bool {
        self.entry(ticket.slot)
            .is_some_and(|entry| entry.generation == ticket.generation)
    }

    pub fn state(&self, slot: Slot) -> Option<&AdmissionState> {
        self.entry(slot).map(|entry| &entry.state)
    }

    pub fn address(&self, ticket: SlotTicket) -> Option<&str> {
        self.entry(ticket.slot)
            .filter(|entry| entry.generation == ticket.generation)
            .and_then(|entry| entry.address.as_deref())
    }

    /// Fills in the address if none was captured at connect time.
    pub fn remember_address(&mut self, ticket: SlotTicket, address: Option<String>) {
        if let Some(entry) = self.current_mut(ticket)
            && entry.address.is_none()
        {
            entry.address = address;
        }
    }

    /// Updates the state of a live occupation. Returns `false` for a stale ticket.
    pub fn set_state(&mut self, ticket: SlotTicket, state: AdmissionState) -> bool {
        match self.current_mut(ticket) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }
}
