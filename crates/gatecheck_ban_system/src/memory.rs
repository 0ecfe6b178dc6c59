//! In-process ban storage with the same query semantics as the SQL backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatecheck_config::LogType;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    ActiveBanKey, BanDetail, BanError, BanQuery, BanRecord, BanStatus, BanTarget,
    storage::BanStorageBackend,
};

/// Parameters of an administrative ban.
#[derive(Debug, Clone, Default)]
pub struct NewBan {
    pub identity: Option<String>,
    pub address: Option<String>,
    pub reason: Option<String>,
    /// `None` for a permanent ban.
    pub duration: Option<Duration>,
    pub scope: Option<i64>,
}

impl NewBan {
    pub fn identity(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Default::default()
        }
    }

    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_scope(mut self, scope: i64) -> Self {
        self.scope = Some(scope);
        self
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<BanRecord>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryBanStorage {
    state: RwLock<MemoryState>,
}

impl MemoryBanStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_ban(&self, ban: NewBan) -> Result<BanRecord, BanError> {
        if ban.identity.is_none() && ban.address.is_none() {
            return Err(BanError::InvalidEntry(
                "a ban needs an identity or an address".to_string(),
            ));
        }

        let now = Utc::now();
        let duration_seconds = ban.duration.map_or(0, |d| d.as_secs() as i64);
        let ends_at = ban
            .duration
            .filter(|_| duration_seconds > 0)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);

        self.insert(BanRecord {
            id: 0,
            identity: ban.identity,
            address: ban.address,
            status: BanStatus::Active,
            created_at: now,
            duration_seconds,
            ends_at,
            reason: ban.reason,
            scope: ban.scope,
        })
        .await
    }

    /// Stores a fully specified record; its `id` is replaced by the next sequence value.
    pub async fn insert(&self, mut record: BanRecord) -> Result<BanRecord, BanError> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        record.id = state.next_id;
        state.records.push(record.clone());

        debug!(
            log_type = LogType::BanSystem.as_str(),
            "Stored ban {} (identity: {:?}, address: {:?})",
            record.id,
            record.identity,
            record.address
        );
        Ok(record)
    }

    /// Marks the record as UNBANNED, keeping its id.
    pub async fn unban(&self, ban_id: i64) -> Result<BanRecord, BanError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == ban_id)
            .ok_or(BanError::NotFound)?;
        record.status = BanStatus::Unbanned;
        Ok(record.clone())
    }

    pub async fn get(&self, ban_id: i64) -> Result<BanRecord, BanError> {
        let state = self.state.read().await;
        state
            .records
            .iter()
            .find(|r| r.id == ban_id)
            .cloned()
            .ok_or(BanError::NotFound)
    }

    pub async fn all(&self) -> Vec<BanRecord> {
        self.state.read().await.records.clone()
    }

    fn matches_query(record: &BanRecord, query: &BanQuery) -> bool {
        record.matches(BanTarget::Identity(&query.identity))
            || query
                .address
                .as_deref()
                .is_some_and(|address| record.matches(BanTarget::Address(address)))
    }

    fn latest_in_effect<'a>(
        records: impl Iterator<Item = &'a BanRecord>,
        now: DateTime<Utc>,
    ) -> Option<BanDetail> {
        records
            .filter(|r| r.is_in_effect(now))
            .max_by_key(|r| r.id)
            .map(BanRecord::detail)
    }
}

#[async_trait]
impl BanStorageBackend for MemoryBanStorage {
    async fn expire_elapsed(&self, query: &BanQuery) -> Result<u64, BanError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut expired = 0;

        for record in state.records.iter_mut() {
            if record.is_elapsed(now)
                && record.in_scope(query.scope)
                && Self::matches_query(record, query)
            {
                record.status = BanStatus::Expired;
                expired += 1;
            }
        }

        Ok(expired)
    }

    async fn count_active(
        &self,
        target: BanTarget<'_>,
        scope: Option<i64>,
    ) -> Result<u64, BanError> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.is_in_effect(now) && r.in_scope(scope) && r.matches(target))
            .count() as u64)
    }

    async fn latest_active(&self, query: &BanQuery) -> Result<Option<BanDetail>, BanError> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(Self::latest_in_effect(
            state
                .records
                .iter()
                .filter(|r| r.in_scope(query.scope) && Self::matches_query(r, query)),
            now,
        ))
    }

    async fn latest_active_for(
        &self,
        target: BanTarget<'_>,
        scope: Option<i64>,
    ) -> Result<Option<BanDetail>, BanError> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(Self::latest_in_effect(
            state
                .records
                .iter()
                .filter(|r| r.in_scope(scope) && r.matches(target)),
            now,
        ))
    }

    async fn latest_unban_id(
        &self,
        identity: &str,
        scope: Option<i64>,
    ) -> Result<Option<i64>, BanError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| {
                r.status == BanStatus::Unbanned
                    && r.in_scope(scope)
                    && r.matches(BanTarget::Identity(identity))
            })
            .map(|r| r.id)
            .max())
    }

    async fn active_keys(&self, scope: Option<i64>) -> Result<Vec<ActiveBanKey>, BanError> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.is_in_effect(now) && r.in_scope(scope))
            .map(|r| ActiveBanKey {
                id: r.id,
                identity: r.identity.clone(),
                address: r.address.clone(),
            })
            .collect())
    }
}
