//! Process-local snapshot of ban state keyed by identity and by address.
//!
//! Lookups never leave the process. The snapshot is rebuilt from the store's
//! active bans by [`BanCache::refresh`] and updated after every authoritative
//! evaluation through [`BanCache::record`]. It is a fallback tier: the
//! authoritative verdict always wins when one is available.
//!
//! Only banned keys are held, so the maps never outgrow the ban list.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use gatecheck_config::LogType;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info};

use crate::{
    BanError, BanQuery, BanVerdict,
    decider::BanSource,
    storage::{BanStorage, BanStorageBackend},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheEntry {
    last_refreshed_at: Instant,
    generation: u64,
}

#[derive(Debug)]
struct CacheInner {
    storage: BanStorage,
    scope: Option<i64>,
    by_identity: DashMap<String, CacheEntry>,
    by_address: DashMap<String, CacheEntry>,
    generation: AtomicU64,
}

impl CacheInner {
    fn entry(&self) -> CacheEntry {
        CacheEntry {
            last_refreshed_at: Instant::now(),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    async fn refresh(&self) -> Result<usize, BanError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let keys = self.storage.active_keys(self.scope).await?;

        for key in &keys {
            let entry = self.entry();
            if let Some(identity) = key.identity.as_deref().filter(|i| !i.is_empty()) {
                self.by_identity.insert(identity.to_string(), entry);
            }
            if let Some(address) = key.address.as_deref().filter(|a| !a.is_empty()) {
                self.by_address.insert(address.to_string(), entry);
            }
        }

        // Entries neither in this snapshot nor recorded since it started are stale
        self.by_identity.retain(|_, entry| entry.generation >= generation);
        self.by_address.retain(|_, entry| entry.generation >= generation);

        Ok(keys.len())
    }
}

#[derive(Debug)]
pub struct BanCache {
    inner: Arc<CacheInner>,
    auto_refresh_handle: Option<JoinHandle<()>>,
}

impl BanCache {
    pub fn new(storage: BanStorage, scope: Option<i64>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                storage,
                scope,
                by_identity: DashMap::new(),
                by_address: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
            auto_refresh_handle: None,
        }
    }

    /// Best-effort answer from the snapshot; an unknown key counts as not banned.
    pub fn is_banned(&self, identity: Option<&str>, address: Option<&str>) -> bool {
        identity.is_some_and(|i| self.identity_banned(i))
            || address.is_some_and(|a| self.address_banned(a))
    }

    pub fn identity_banned(&self, identity: &str) -> bool {
        self.inner.by_identity.contains_key(identity)
    }

    pub fn address_banned(&self, address: &str) -> bool {
        self.inner.by_address.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.inner.by_identity.len() + self.inner.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies an authoritative verdict: banned keys are stored, clean keys evicted.
    pub fn record(&self, query: &BanQuery, verdict: &BanVerdict) {
        Self::apply(
            &self.inner.by_identity,
            &query.identity,
            verdict.identity_banned.then(|| self.inner.entry()),
        );

        if let Some(address) = query.address.as_deref() {
            Self::apply(
                &self.inner.by_address,
                address,
                verdict.address_banned.then(|| self.inner.entry()),
            );
        }
    }

    fn apply(map: &DashMap<String, CacheEntry>, key: &str, entry: Option<CacheEntry>) {
        match entry {
            Some(entry) => {
                map.insert(key.to_string(), entry);
            }
            None => {
                map.remove(key);
            }
        }
    }

    /// Rebuilds the snapshot from the store. Returns the number of active bans loaded.
    pub async fn refresh(&self) -> Result<usize, BanError> {
        let count = self.inner.refresh().await?;
        debug!(
            log_type = LogType::Cache.as_str(),
            "Ban cache refreshed with {} active ban(s)", count
        );
        Ok(count)
    }

    /// Fire-and-forget refresh; failures are logged, never returned.
    pub fn refresh_in_background(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.refresh().await {
                error!(
                    log_type = LogType::Cache.as_str(),
                    "Failed to refresh ban cache: {}", e
                );
            }
        })
    }

    /// Periodically rebuilds the snapshot until the cache is dropped.
    pub fn start_auto_refresh(&mut self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        if let Some(handle) = self.auto_refresh_handle.take() {
            handle.abort();
        }

        let inner = self.inner.clone();
        info!(
            log_type = LogType::Cache.as_str(),
            "Refreshing ban cache every {:?}", interval
        );

        self.auto_refresh_handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);

            loop {
                interval.tick().await;

                match inner.refresh().await {
                    Ok(count) => {
                        debug!(
                            log_type = LogType::Cache.as_str(),
                            "Auto-refresh loaded {} active ban(s)", count
                        );
                    }
                    Err(e) => {
                        error!(
                            log_type = LogType::Cache.as_str(),
                            "Error during ban cache auto-refresh: {}", e
                        );
                    }
                }
            }
        }));
    }
}

impl Drop for BanCache {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_refresh_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BanSource for BanCache {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn check(&self, query: &BanQuery) -> Result<BanVerdict, BanError> {
        if let Some(entry) = self.inner.by_identity.get(&query.identity) {
            debug!(
                log_type = LogType::Cache.as_str(),
                "Cached ban for {} is {:?} old",
                query.identity,
                entry.last_refreshed_at.elapsed()
            );
        }

        let identity_banned = self.identity_banned(&query.identity);
        let address_banned = query
            .address
            .as_deref()
            .is_some_and(|address| self.address_banned(address));

        Ok(BanVerdict::from_tiers(identity_banned, address_banned))
    }
}
