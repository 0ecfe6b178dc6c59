//! # Gatecheck
//!
//! Admission control for multiplayer servers. A connecting client is resolved
//! to its platform identity, checked against the ban store (identity and
//! address tiers) off the main path, and disconnected on the main path if the
//! verdict says so.

pub mod enforcer;
pub mod error;
pub mod host;
pub mod mock;
pub mod resolver;
pub mod scheduler;
pub mod slots;
pub mod telemetry;

use std::{path::Path, sync::Arc};

use gatecheck_ban_system::{
    BanCache, BanDecider, BanEvaluator, BanStorage, DatabaseKind, EvaluationOptions,
    storage::{BanConfig, BanStorageType},
};
use gatecheck_config::{GatecheckConfig, LogType, RelayConfig};
use gatecheck_event::{ActivityPublisher, ActivityRelay, EventBus};
use tokio::runtime::Handle;
use tracing::{info, warn};

pub use enforcer::{AdmissionEnforcer, AdmissionEvent, EnforcementOptions};
pub use error::{AdmissionError, HostError};
pub use host::{DisconnectReason, JoinNotice, SessionHost, SessionInfo, Slot};
pub use resolver::{IdentityResolver, ResolveStep};
pub use slots::{AdmissionState, SlotTicket};

/// Configured pipeline, ready to drive one enforcer per host.
pub struct Gatecheck {
    config: GatecheckConfig,
    decider: Arc<BanDecider>,
    runtime: Option<Handle>,
}

impl Gatecheck {
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, AdmissionError> {
        let config = GatecheckConfig::from_file(path)?;
        Self::new(config).await
    }

    pub async fn new(config: GatecheckConfig) -> Result<Self, AdmissionError> {
        config.validate()?;
        let decider = build_decider(&config).await?;
        Ok(Self {
            config,
            decider: Arc::new(decider),
            runtime: Handle::try_current().ok(),
        })
    }

    pub fn config(&self) -> &GatecheckConfig {
        &self.config
    }

    pub fn decider(&self) -> Arc<BanDecider> {
        self.decider.clone()
    }

    /// Enforcer bound to the runtime this pipeline was built on, so the host
    /// may drive it from its own thread.
    pub fn enforcer<H: SessionHost>(&self, host: H) -> AdmissionEnforcer<H> {
        let enforcer =
            AdmissionEnforcer::from_config(host, self.decider.clone(), &self.config.ban_check);
        match &self.runtime {
            Some(runtime) => enforcer.with_runtime(runtime.clone()),
            None => enforcer,
        }
    }
}

/// Wires store, evaluator and optional cache behind one decider.
pub async fn build_decider(config: &GatecheckConfig) -> Result<BanDecider, AdmissionError> {
    let ban_check = &config.ban_check;
    let policy = ban_check.store_failure.into();

    if !ban_check.has_store() {
        warn!(
            log_type = LogType::BanCheck.as_str(),
            "No ban store configured, connecting clients will not be checked"
        );
        return Ok(BanDecider::new(policy));
    }

    let connection_string = ban_check.connection_string.trim();
    let storage = BanStorage::new(&BanConfig {
        storage_type: BanStorageType::Sql,
        connection_string: Some(connection_string.to_string()),
        max_connections: ban_check.max_connections,
        acquire_timeout: ban_check.store_timeout,
        ensure_schema: DatabaseKind::detect(connection_string) == DatabaseKind::Sqlite,
    })
    .await?;

    let scope = ban_check.scope();
    let evaluator = BanEvaluator::new(
        storage.clone(),
        EvaluationOptions {
            check_ip_bans: ban_check.check_ip_bans,
            scope,
        },
    );

    let mut decider = BanDecider::new(policy)
        .with_authority(Arc::new(evaluator))
        .with_timeout(ban_check.store_timeout);

    if config.cache.enabled {
        let mut cache = BanCache::new(storage, scope);
        cache.refresh_in_background();
        cache.start_auto_refresh(config.cache.refresh_interval);
        decider = decider.with_cache(Arc::new(cache));
    }

    info!(
        log_type = LogType::BanCheck.as_str(),
        "Ban checks enabled (address tier: {}, scope: {:?}, cache: {})",
        ban_check.check_ip_bans,
        scope,
        config.cache.enabled
    );

    Ok(decider)
}

/// Relays admin activity from `bus` when enabled. Returns whether it was attached.
pub fn attach_relay<P: ActivityPublisher>(
    config: &RelayConfig,
    publisher: Arc<P>,
    bus: &EventBus,
) -> bool {
    if !config.enabled {
        return false;
    }

    ActivityRelay::new(config.channel.clone(), publisher).attach(bus);
    info!(
        log_type = LogType::Relay.as_str(),
        "Relaying admin activity on channel '{}'", config.channel
    );
    true
}
