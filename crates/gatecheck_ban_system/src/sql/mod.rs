//! Relational ban store over MySQL or embedded SQLite.
//!
//! The dialect is picked from the connection string's shape. Every statement
//! is parameterized; statement texts are built once per scoping mode.

mod dialect;
mod queries;

use std::time::Duration;

use async_trait::async_trait;
use gatecheck_config::LogType;
use sqlx::{
    MySqlPool, SqlitePool,
    mysql::MySqlPoolOptions,
    sqlite::SqlitePoolOptions,
};
use tracing::{debug, info};

pub use dialect::DatabaseKind;
use queries::Statements;

use crate::{
    ActiveBanKey, BanDetail, BanError, BanQuery, BanStatus, BanTarget, NewBan,
    storage::BanStorageBackend,
};

#[derive(Debug, Clone, Copy)]
pub struct SqlPoolSettings {
    pub max_connections: u32,
    /// Waiting longer than this for a connection fails the query.
    pub acquire_timeout: Duration,
}

impl Default for SqlPoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

/// Runs the same body against whichever pool is configured.
macro_rules! on_pool {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool {
            DbPool::MySql($p) => $body,
            DbPool::Sqlite($p) => $body,
        }
    };
}

#[derive(Debug, Clone)]
pub struct SqlBanStorage {
    pool: DbPool,
    kind: DatabaseKind,
}

impl SqlBanStorage {
    /// Builds a lazily connecting pool; nothing touches the network until the first query.
    pub fn connect(connection_string: &str, settings: SqlPoolSettings) -> Result<Self, BanError> {
        let kind = DatabaseKind::detect(connection_string);
        let max_connections = settings.max_connections.max(1);

        let pool = match kind {
            DatabaseKind::MySql => {
                let options = dialect::mysql_options(connection_string)?;
                DbPool::MySql(
                    MySqlPoolOptions::new()
                        .max_connections(max_connections)
                        .acquire_timeout(settings.acquire_timeout)
                        .connect_lazy_with(options),
                )
            }
            DatabaseKind::Sqlite => {
                let (options, in_memory) = dialect::sqlite_options(connection_string)?;
                let pool_options = if in_memory {
                    // Each connection to :memory: is its own database
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None::<Duration>)
                        .max_lifetime(None::<Duration>)
                } else {
                    SqlitePoolOptions::new().max_connections(max_connections)
                };
                DbPool::Sqlite(
                    pool_options
                        .acquire_timeout(settings.acquire_timeout)
                        .connect_lazy_with(options),
                )
            }
        };

        info!(
            log_type = LogType::BanSystem.as_str(),
            "Using {} ban store (max {} connections)", kind, max_connections
        );

        Ok(Self { pool, kind })
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Creates the ban table and its indexes when missing.
    pub async fn ensure_schema(&self) -> Result<(), BanError> {
        for statement in queries::schema(self.kind) {
            on_pool!(&self.pool, |pool| {
                sqlx::query(statement).execute(pool).await?;
            });
        }

        debug!(
            log_type = LogType::BanSystem.as_str(),
            "Ban schema ready on {}", self.kind
        );
        Ok(())
    }

    pub async fn add_ban(&self, ban: &NewBan) -> Result<i64, BanError> {
        if ban.identity.is_none() && ban.address.is_none() {
            return Err(BanError::InvalidEntry(
                "a ban needs an identity or an address".to_string(),
            ));
        }

        let seconds = ban.duration.map_or(0, |d| d.as_secs() as i64);
        let sql = queries::insert_ban(self.kind, seconds == 0);

        macro_rules! insert {
            ($pool:expr) => {{
                let mut query = sqlx::query(sql)
                    .bind(ban.identity.as_deref())
                    .bind(ban.address.as_deref())
                    .bind(ban.reason.as_deref())
                    .bind(seconds)
                    .bind(ban.scope);
                if seconds > 0 {
                    query = query.bind(seconds);
                }
                query.execute($pool).await?
            }};
        }

        let id = match &self.pool {
            DbPool::MySql(pool) => insert!(pool).last_insert_id() as i64,
            DbPool::Sqlite(pool) => insert!(pool).last_insert_rowid(),
        };

        info!(
            log_type = LogType::BanSystem.as_str(),
            "Stored ban {} (identity: {:?}, address: {:?})", id, ban.identity, ban.address
        );
        Ok(id)
    }

    pub async fn unban(&self, ban_id: i64) -> Result<(), BanError> {
        let changed = on_pool!(&self.pool, |pool| sqlx::query(queries::UNBAN)
            .bind(ban_id)
            .execute(pool)
            .await?
            .rows_affected());

        if changed == 0 {
            return Err(BanError::NotFound);
        }
        Ok(())
    }

    pub async fn status_of(&self, ban_id: i64) -> Result<BanStatus, BanError> {
        let status: Option<String> = on_pool!(&self.pool, |pool| {
            sqlx::query_scalar::<_, String>(queries::STATUS_OF)
                .bind(ban_id)
                .fetch_optional(pool)
                .await?
        });

        status.ok_or(BanError::NotFound)?.parse()
    }
}

#[async_trait]
impl BanStorageBackend for SqlBanStorage {
    async fn expire_elapsed(&self, query: &BanQuery) -> Result<u64, BanError> {
        let statements = Statements::for_scope(query.scope);
        let sql = if query.address.is_some() {
            statements.expire_any.as_str()
        } else {
            statements.expire_identity.as_str()
        };

        let expired = on_pool!(&self.pool, |pool| {
            let mut statement = sqlx::query(sql).bind(query.identity.as_str());
            if let Some(address) = query.address.as_deref() {
                statement = statement.bind(address);
            }
            if let Some(scope) = query.scope {
                statement = statement.bind(scope);
            }
            statement.execute(pool).await?.rows_affected()
        });

        if expired > 0 {
            debug!(
                log_type = LogType::BanSystem.as_str(),
                "Expired {} elapsed ban(s) for {}", expired, query.identity
            );
        }
        Ok(expired)
    }

    async fn count_active(
        &self,
        target: BanTarget<'_>,
        scope: Option<i64>,
    ) -> Result<u64, BanError> {
        let statements = Statements::for_scope(scope);
        let (sql, value) = match target {
            BanTarget::Identity(identity) => (statements.count_identity.as_str(), identity),
            BanTarget::Address(address) => (statements.count_address.as_str(), address),
        };

        let count = on_pool!(&self.pool, |pool| {
            let mut statement = sqlx::query_scalar::<_, i64>(sql).bind(value);
            if let Some(scope) = scope {
                statement = statement.bind(scope);
            }
            statement.fetch_one(pool).await?
        });

        Ok(count.max(0) as u64)
    }

    async fn latest_active(&self, query: &BanQuery) -> Result<Option<BanDetail>, BanError> {
        let Some(address) = query.address.as_deref() else {
            return self
                .latest_active_for(BanTarget::Identity(&query.identity), query.scope)
                .await;
        };

        let sql = Statements::for_scope(query.scope).latest_any.as_str();
        let row = on_pool!(&self.pool, |pool| {
            let mut statement = sqlx::query_as::<_, (i64, Option<String>)>(sql)
                .bind(query.identity.as_str())
                .bind(address);
            if let Some(scope) = query.scope {
                statement = statement.bind(scope);
            }
            statement.fetch_optional(pool).await?
        });

        Ok(row.map(|(id, reason)| BanDetail { id, reason }))
    }

    async fn latest_active_for(
        &self,
        target: BanTarget<'_>,
        scope: Option<i64>,
    ) -> Result<Option<BanDetail>, BanError> {
        let statements = Statements::for_scope(scope);
        let (sql, value) = match target {
            BanTarget::Identity(identity) => (statements.latest_identity.as_str(), identity),
            BanTarget::Address(address) => (statements.latest_address.as_str(), address),
        };

        let row = on_pool!(&self.pool, |pool| {
            let mut statement = sqlx::query_as::<_, (i64, Option<String>)>(sql).bind(value);
            if let Some(scope) = scope {
                statement = statement.bind(scope);
            }
            statement.fetch_optional(pool).await?
        });

        Ok(row.map(|(id, reason)| BanDetail { id, reason }))
    }

    async fn latest_unban_id(
        &self,
        identity: &str,
        scope: Option<i64>,
    ) -> Result<Option<i64>, BanError> {
        let sql = Statements::for_scope(scope).latest_unban.as_str();

        let id = on_pool!(&self.pool, |pool| {
            let mut statement = sqlx::query_scalar::<_, Option<i64>>(sql).bind(identity);
            if let Some(scope) = scope {
                statement = statement.bind(scope);
            }
            statement.fetch_one(pool).await?
        });

        Ok(id)
    }

    async fn active_keys(&self, scope: Option<i64>) -> Result<Vec<ActiveBanKey>, BanError> {
        let sql = Statements::for_scope(scope).active_keys.as_str();

        let rows = on_pool!(&self.pool, |pool| {
            let mut statement =
                sqlx::query_as::<_, (i64, Option<String>, Option<String>)>(sql);
            if let Some(scope) = scope {
                statement = statement.bind(scope);
            }
            statement.fetch_all(pool).await?
        });

        Ok(rows
            .into_iter()
            .map(|(id, identity, address)| ActiveBanKey {
                id,
                identity,
                address,
            })
            .collect())
    }
}
