//! Admission pipeline: resolve the identity, decide off the main path, and
//! enforce back on it.
//!
//! The enforcer owns all per-slot state and is driven from the host's main
//! update path ([`AdmissionEnforcer::process_pending`] or the async
//! [`AdmissionEnforcer::step`] loop). Store lookups run as tasks on a Tokio
//! runtime and post their [`Decision`] back through the main queue, so session
//! state is only ever read or mutated on the main path. The main path itself
//! may be any thread, inside a runtime or not.

use std::{sync::Arc, time::Duration};

use gatecheck_ban_system::{BanDecider, BanQuery, Decision};
use gatecheck_config::{BanCheckConfig, LogType};
use gatecheck_event::{BUS, ClientAdmitted, ClientBlocked, EventBus};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::AdmissionError,
    host::{DisconnectReason, JoinNotice, SessionHost, Slot, strip_port},
    resolver::{IdentityResolver, ResolveStep, ResolvedClient},
    scheduler::MainQueue,
    slots::{AdmissionState, SlotTable, SlotTicket},
};

#[derive(Debug)]
pub enum AdmissionEvent {
    Resolve {
        ticket: SlotTicket,
        attempt: u32,
    },
    Verdict {
        ticket: SlotTicket,
        query: BanQuery,
        decision: Decision,
    },
    /// Second pass of the block path, in case the disconnect recreated host state.
    FollowUp {
        ticket: SlotTicket,
        identity: String,
        retry_disconnect: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementOptions {
    pub send_join_message: bool,
    pub check_ip_bans: bool,
    pub scope: Option<i64>,
    pub follow_up_delay: Duration,
}

impl EnforcementOptions {
    pub const FOLLOW_UP_DELAY: Duration = Duration::from_millis(100);

    pub fn from_config(config: &BanCheckConfig) -> Self {
        Self {
            send_join_message: config.send_join_message,
            check_ip_bans: config.check_ip_bans,
            scope: config.scope(),
            follow_up_delay: Self::FOLLOW_UP_DELAY,
        }
    }
}

impl Default for EnforcementOptions {
    fn default() -> Self {
        Self::from_config(&BanCheckConfig::default())
    }
}

enum EventSink {
    Global,
    Bus(Arc<EventBus>),
}

pub struct AdmissionEnforcer<H: SessionHost> {
    host: H,
    decider: Arc<BanDecider>,
    resolver: IdentityResolver,
    options: EnforcementOptions,
    slots: SlotTable,
    queue: MainQueue<AdmissionEvent>,
    events: EventSink,
    runtime: Option<Handle>,
}

impl<H: SessionHost> AdmissionEnforcer<H> {
    /// Captures the current Tokio runtime, if any, for store lookups.
    /// Use [`Self::with_runtime`] when building outside of one.
    pub fn new(
        host: H,
        decider: Arc<BanDecider>,
        resolver: IdentityResolver,
        options: EnforcementOptions,
    ) -> Self {
        Self {
            host,
            decider,
            resolver,
            options,
            slots: SlotTable::new(),
            queue: MainQueue::new(),
            events: EventSink::Global,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn from_config(host: H, decider: Arc<BanDecider>, config: &BanCheckConfig) -> Self {
        Self::new(
            host,
            decider,
            IdentityResolver::from_config(config),
            EnforcementOptions::from_config(config),
        )
    }

    /// Publishes admission events on `bus` instead of the global [`BUS`].
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = EventSink::Bus(bus);
        self
    }

    /// Runtime the store lookups are spawned on.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn state(&self, slot: Slot) -> Option<&AdmissionState> {
        self.slots.state(slot)
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    fn bus(&self) -> &EventBus {
        match &self.events {
            EventSink::Global => &*BUS,
            EventSink::Bus(bus) => bus.as_ref(),
        }
    }

    /// Connection observed. The address is captured now since the live
    /// session may lose it later.
    pub fn on_client_connect(&mut self, slot: Slot, raw_address: &str) -> SlotTicket {
        let ticket = self.slots.occupy(slot, strip_port(raw_address));
        debug!(
            log_type = LogType::BanCheck.as_str(),
            "Client connecting on slot {} from {:?}",
            slot,
            self.slots.address(ticket)
        );
        self.begin(ticket);
        ticket
    }

    /// Connection finalized. Starts an admission only if none is in flight
    /// or finished for this occupation.
    pub fn on_client_connected(&mut self, slot: Slot) -> Option<SlotTicket> {
        if self.slots.state(slot).is_some() {
            return None;
        }

        let address = self
            .host
            .session(slot)
            .and_then(|session| session.address)
            .and_then(|address| strip_port(&address));
        let ticket = self.slots.occupy(slot, address);
        self.begin(ticket);
        Some(ticket)
    }

    pub fn on_client_disconnect(&mut self, slot: Slot) {
        if let Some(state) = self.slots.release(slot) {
            trace!(
                log_type = LogType::BanCheck.as_str(),
                "Slot {} released in state {:?}", slot, state
            );
        }
    }

    fn begin(&mut self, ticket: SlotTicket) {
        self.slots
            .set_state(ticket, AdmissionState::Resolving { attempt: 0 });
        self.queue
            .run_on_next_update(AdmissionEvent::Resolve { ticket, attempt: 0 });
    }

    /// Runs every event that is due. Call once per host update.
    pub fn process_pending(&mut self) -> usize {
        let events = self.queue.drain_due();
        let count = events.len();
        for event in events {
            self.handle(event);
        }
        count
    }

    /// Waits for the next due event, then processes everything due.
    pub async fn step(&mut self) -> usize {
        self.queue.wait().await;
        self.process_pending()
    }

    pub async fn run(mut self) {
        loop {
            self.step().await;
        }
    }

    fn handle(&mut self, event: AdmissionEvent) {
        match event {
            AdmissionEvent::Resolve { ticket, attempt } => self.on_resolve(ticket, attempt),
            AdmissionEvent::Verdict {
                ticket,
                query,
                decision,
            } => self.on_verdict(ticket, query, decision),
            AdmissionEvent::FollowUp {
                ticket,
                identity,
                retry_disconnect,
            } => self.on_follow_up(ticket, &identity, retry_disconnect),
        }
    }

    fn on_resolve(&mut self, ticket: SlotTicket, attempt: u32) {
        if !self.slots.is_current(ticket) {
            trace!(
                log_type = LogType::BanCheck.as_str(),
                "Dropping resolution for slot {}, client left", ticket.slot
            );
            return;
        }

        match self.resolver.poll(&self.host, ticket.slot, attempt) {
            ResolveStep::Resolved(client) => self.start_evaluation(ticket, client),
            ResolveStep::Retry { attempt, delay } => {
                self.slots
                    .set_state(ticket, AdmissionState::Resolving { attempt });
                self.queue
                    .run_after(delay, AdmissionEvent::Resolve { ticket, attempt });
            }
            ResolveStep::Exhausted { attempts } => {
                warn!(
                    log_type = LogType::BanCheck.as_str(),
                    "{}",
                    AdmissionError::IdentityUnresolved {
                        slot: ticket.slot,
                        attempts
                    }
                );
                self.slots.set_state(ticket, AdmissionState::Unresolved);
            }
        }
    }

    fn start_evaluation(&mut self, ticket: SlotTicket, client: ResolvedClient) {
        let Some(runtime) = self.runtime() else {
            error!(
                log_type = LogType::BanCheck.as_str(),
                "{}",
                AdmissionError::RuntimeUnavailable {
                    slot: ticket.slot,
                    identity: client.identity,
                }
            );
            self.slots.set_state(ticket, AdmissionState::Unresolved);
            return;
        };

        self.slots.remember_address(ticket, client.address);

        // Every resolved client, not only blocked ones
        if self.clear_ban_list(ticket.slot, &client.identity) {
            debug!(
                log_type = LogType::BanCheck.as_str(),
                "Host ban list cleared on connect for {} ({})", client.name, client.identity
            );
        }

        let address = self
            .slots
            .address(ticket)
            .filter(|_| self.options.check_ip_bans)
            .map(str::to_string);
        let query = BanQuery::new(client.identity.as_str())
            .with_address(address)
            .with_scope(self.options.scope);

        if let Some(cached) = self.decider.precheck(&query) {
            debug!(
                log_type = LogType::BanCheck.as_str(),
                "Cache pre-check for {} ({}) on slot {}: banned={}",
                client.name,
                query.identity,
                ticket.slot,
                cached
            );
        }

        self.slots.set_state(
            ticket,
            AdmissionState::Evaluating {
                identity: client.identity,
            },
        );

        let decider = self.decider.clone();
        let handle = self.queue.handle();
        runtime.spawn(async move {
            let decision = decider.decide(&query).await;
            let slot = ticket.slot;
            if !handle.post(AdmissionEvent::Verdict {
                ticket,
                query,
                decision,
            }) {
                debug!(
                    log_type = LogType::BanCheck.as_str(),
                    "Enforcer gone, dropping verdict for slot {}", slot
                );
            }
        });
    }

    fn on_verdict(&mut self, ticket: SlotTicket, query: BanQuery, decision: Decision) {
        let slot = ticket.slot;
        let current = self
            .host
            .session(slot)
            .and_then(|session| session.resolved_identity().map(str::to_string));

        if !self.slots.is_current(ticket) || current.as_deref() != Some(query.identity.as_str()) {
            debug!(
                log_type = LogType::BanCheck.as_str(),
                "{}",
                AdmissionError::StaleSlotRace {
                    slot,
                    expected: query.identity,
                    found: current,
                }
            );
            self.slots.set_state(ticket, AdmissionState::Discarded);
            return;
        }

        if let Some(message) = &decision.store_error {
            error!(
                log_type = LogType::BanCheck.as_str(),
                "{}",
                AdmissionError::StoreUnavailable {
                    identity: query.identity.clone(),
                    operation: "ban evaluation",
                    message: message.clone(),
                }
            );
        }

        let verdict = &decision.verdict;
        info!(
            log_type = LogType::BanCheck.as_str(),
            slot,
            identity = %query.identity,
            address = ?query.address,
            blocked = verdict.blocked,
            identity_banned = verdict.identity_banned,
            address_banned = verdict.address_banned,
            bypassed_by_unban = verdict.bypassed_by_unban,
            latest_unban_id = ?verdict.latest_unban_id,
            ban_id = ?verdict.active_ban.as_ref().map(|ban| ban.id),
            expired_updated = verdict.expired_updated,
            source = ?decision.source,
            "Ban check for {} on slot {}: {}",
            query.identity,
            slot,
            if verdict.blocked { "blocked" } else { "admitted" }
        );

        if verdict.blocked {
            self.block(ticket, query, decision);
        } else {
            self.admit(ticket, query, decision);
        }
    }

    fn block(&mut self, ticket: SlotTicket, query: BanQuery, decision: Decision) {
        let slot = ticket.slot;
        self.clear_ban_list(slot, &query.identity);

        let disconnected = match self.host.disconnect(slot, DisconnectReason::Banned) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    log_type = LogType::BanCheck.as_str(),
                    "{}",
                    AdmissionError::side_effect(slot, "disconnect", e)
                );
                false
            }
        };

        self.slots.set_state(
            ticket,
            AdmissionState::Blocked {
                identity: query.identity.clone(),
            },
        );
        self.queue.run_after(
            self.options.follow_up_delay,
            AdmissionEvent::FollowUp {
                ticket,
                identity: query.identity.clone(),
                retry_disconnect: !disconnected,
            },
        );

        if decision.is_authoritative()
            && let Some(cache) = self.decider.cache()
            && let Some(runtime) = self.runtime()
        {
            let cache = cache.clone();
            runtime.spawn(async move {
                if let Err(e) = cache.refresh().await {
                    warn!(
                        log_type = LogType::Cache.as_str(),
                        "Cache refresh after block failed: {}", e
                    );
                }
            });
        }

        let active_ban = decision.verdict.active_ban;
        self.bus().emit(&ClientBlocked {
            slot,
            identity: query.identity,
            address: query.address,
            ban_id: active_ban.as_ref().map(|ban| ban.id),
            reason: active_ban.and_then(|ban| ban.reason),
        });
    }

    fn clear_ban_list(&self, slot: Slot, identity: &str) -> bool {
        match self.host.clear_ban_list(identity) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    log_type = LogType::BanCheck.as_str(),
                    "{}",
                    AdmissionError::side_effect(slot, "ban list cleanup", e)
                );
                false
            }
        }
    }

    fn on_follow_up(&mut self, ticket: SlotTicket, identity: &str, retry_disconnect: bool) {
        self.clear_ban_list(ticket.slot, identity);

        if !retry_disconnect || !self.slots.is_current(ticket) {
            return;
        }

        let still_there = self
            .host
            .session(ticket.slot)
            .is_some_and(|session| session.resolved_identity() == Some(identity));
        if !still_there {
            return;
        }

        if let Err(e) = self.host.disconnect(ticket.slot, DisconnectReason::Banned) {
            error!(
                log_type = LogType::BanCheck.as_str(),
                "{}, giving up",
                AdmissionError::side_effect(ticket.slot, "disconnect", e)
            );
        }
    }

    fn admit(&mut self, ticket: SlotTicket, query: BanQuery, decision: Decision) {
        let verdict = decision.verdict;
        self.slots.set_state(
            ticket,
            AdmissionState::Admitted {
                identity: query.identity.clone(),
            },
        );

        if self.options.send_join_message {
            let notice = if verdict.expired_updated {
                JoinNotice::ExpiryProcessed
            } else {
                JoinNotice::CheckEnabled
            };
            self.host.notify(ticket.slot, notice);
        }

        self.bus().emit(&ClientAdmitted {
            slot: ticket.slot,
            identity: query.identity,
            expired_ban_processed: verdict.expired_updated,
            bypassed_by_unban: verdict.bypassed_by_unban,
        });
    }
}
