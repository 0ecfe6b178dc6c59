//! Storage trait and implementation for ban data

use std::sync::Arc;
use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use gatecheck_config::LogType;
use tracing::{info, warn};

use crate::{
    ActiveBanKey, BanDetail, BanError, BanQuery, BanTarget,
    memory::MemoryBanStorage,
    sql::{SqlBanStorage, SqlPoolSettings},
};

/// Queries the evaluator needs from an authoritative ban store.
///
/// Every method is scoped: when `scope` is `Some`, only records of that
/// server scope are considered.
#[async_trait]
pub trait BanStorageBackend: Send + Sync + Debug {
    /// Marks ACTIVE, non-permanent records of the query's identity (or
    /// address) whose end time has passed as EXPIRED. Returns the number of
    /// rows changed; repeating the call is a no-op.
    async fn expire_elapsed(&self, query: &BanQuery) -> Result<u64, BanError>;

    async fn count_active(&self, target: BanTarget<'_>, scope: Option<i64>)
    -> Result<u64, BanError>;

    /// Most recent in-effect ban matching the identity or the address.
    async fn latest_active(&self, query: &BanQuery) -> Result<Option<BanDetail>, BanError>;

    async fn latest_active_for(
        &self,
        target: BanTarget<'_>,
        scope: Option<i64>,
    ) -> Result<Option<BanDetail>, BanError>;

    /// Highest record id of an UNBANNED record for `identity`.
    async fn latest_unban_id(&self, identity: &str, scope: Option<i64>)
    -> Result<Option<i64>, BanError>;

    /// Every in-effect ban, for cache warm-up.
    async fn active_keys(&self, scope: Option<i64>) -> Result<Vec<ActiveBanKey>, BanError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanStorageType {
    Memory,
    Sql,
}

#[derive(Debug, Clone)]
pub struct BanConfig {
    pub storage_type: BanStorageType,

    pub connection_string: Option<String>,

    pub max_connections: u32,

    /// Upper bound on waiting for a pooled connection; a timeout surfaces as a store error.
    pub acquire_timeout: Duration,

    /// Create the ban table if it does not exist yet.
    pub ensure_schema: bool,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            storage_type: BanStorageType::Sql,
            connection_string: None,
            max_connections: 4,
            acquire_timeout: Duration::from_secs(5),
            ensure_schema: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BanStorage {
    backend: Arc<dyn BanStorageBackend>,
}

impl BanStorage {
    pub async fn new(config: &BanConfig) -> Result<Self, BanError> {
        let backend: Arc<dyn BanStorageBackend> = match config.storage_type {
            BanStorageType::Memory => {
                info!(
                    log_type = LogType::BanSystem.as_str(),
                    "Initializing in-memory ban storage"
                );
                warn!(
                    log_type = LogType::BanSystem.as_str(),
                    "In-memory ban storage is not persistent and will be lost on restart"
                );
                Arc::new(MemoryBanStorage::new())
            }
            BanStorageType::Sql => {
                let connection_string = config.connection_string.as_deref().ok_or_else(|| {
                    BanError::Connection("Connection string not provided in config".to_string())
                })?;

                let storage = SqlBanStorage::connect(
                    connection_string,
                    SqlPoolSettings {
                        max_connections: config.max_connections,
                        acquire_timeout: config.acquire_timeout,
                    },
                )?;

                if config.ensure_schema {
                    storage.ensure_schema().await?;
                }

                Arc::new(storage)
            }
        };

        Ok(Self { backend })
    }

    pub fn from_backend(backend: Arc<dyn BanStorageBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BanStorageBackend for BanStorage {
    async fn expire_elapsed(&self, query: &BanQuery) -> Result<u64, BanError> {
        self.backend.expire_elapsed(query).await
    }

    async fn count_active(
        &self,
        target: BanTarget<'_>,
        scope: Option<i64>,
    ) -> Result<u64, BanError> {
        self.backend.count_active(target, scope).await
    }

    async fn latest_active(&self, query: &BanQuery) -> Result<Option<BanDetail>, BanError> {
        self.backend.latest_active(query).await
    }

    async fn latest_active_for(
        &self,
        target: BanTarget<'_>,
        scope: Option<i64>,
    ) -> Result<Option<BanDetail>, BanError> {
        self.backend.latest_active_for(target, scope).await
    }

    async fn latest_unban_id(
        &self,
        identity: &str,
        scope: Option<i64>,
    ) -> Result<Option<i64>, BanError> {
        self.backend.latest_unban_id(identity, scope).await
    }

    async fn active_keys(&self, scope: Option<i64>) -> Result<Vec<ActiveBanKey>, BanError> {
        self.backend.active_keys(scope).await
    }
}
