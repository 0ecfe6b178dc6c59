//! Two-tier ban evaluation (identity + network address) against an
//! authoritative store, with lazy expiry and an optional in-process cache.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod decider;
pub mod evaluator;
pub mod memory;
pub mod sql;
pub mod storage;

pub use cache::BanCache;
pub use decider::{BanDecider, BanSource, Decision, FailurePolicy, VerdictSource};
pub use evaluator::{BanEvaluator, EvaluationOptions};
pub use memory::{MemoryBanStorage, NewBan};
pub use sql::{DatabaseKind, DbPool, SqlBanStorage, SqlPoolSettings};
pub use storage::{BanStorage, BanStorageBackend};

#[derive(Debug, Error)]
pub enum BanError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid connection string: {0}")]
    Connection(String),

    #[error("Invalid ban entry: {0}")]
    InvalidEntry(String),

    #[error("Ban not found")]
    NotFound,

    #[error("Ban store did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BanStatus {
    Active,
    Expired,
    Unbanned,
}

impl BanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanStatus::Active => "ACTIVE",
            BanStatus::Expired => "EXPIRED",
            BanStatus::Unbanned => "UNBANNED",
        }
    }
}

impl FromStr for BanStatus {
    type Err = BanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(BanStatus::Active),
            "EXPIRED" => Ok(BanStatus::Expired),
            "UNBANNED" => Ok(BanStatus::Unbanned),
            other => Err(BanError::InvalidEntry(format!("unknown ban status '{other}'"))),
        }
    }
}

impl fmt::Display for BanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the ban table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: i64,
    pub identity: Option<String>,
    pub address: Option<String>,
    pub status: BanStatus,
    pub created_at: DateTime<Utc>,
    /// Zero means permanent; `ends_at` is ignored in that case.
    pub duration_seconds: i64,
    pub ends_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub scope: Option<i64>,
}

impl BanRecord {
    pub fn is_permanent(&self) -> bool {
        self.duration_seconds == 0
    }

    /// ACTIVE and still inside its time window at `now`.
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        self.status == BanStatus::Active
            && (self.is_permanent() || self.ends_at.is_none_or(|ends| ends > now))
    }

    /// ACTIVE but its time window has elapsed; the expiry sweep targets these.
    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == BanStatus::Active
            && self.duration_seconds > 0
            && self.ends_at.is_some_and(|ends| ends <= now)
    }

    pub fn matches(&self, target: BanTarget<'_>) -> bool {
        match target {
            BanTarget::Identity(identity) => self.identity.as_deref() == Some(identity),
            BanTarget::Address(address) => self.address.as_deref() == Some(address),
        }
    }

    pub fn in_scope(&self, scope: Option<i64>) -> bool {
        scope.is_none_or(|scope| self.scope == Some(scope))
    }

    pub fn detail(&self) -> BanDetail {
        BanDetail {
            id: self.id,
            reason: self.reason.clone(),
        }
    }
}

/// Which tier a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanTarget<'a> {
    Identity(&'a str),
    Address(&'a str),
}

/// Diagnostic summary of the record that made a tier match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanDetail {
    pub id: i64,
    pub reason: Option<String>,
}

/// The identity and address of an active ban, used to warm the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBanKey {
    pub id: i64,
    pub identity: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanQuery {
    pub identity: String,
    /// Only set when address checking is enabled and an address is known.
    pub address: Option<String>,
    pub scope: Option<i64>,
}

impl BanQuery {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            address: None,
            scope: None,
        }
    }

    pub fn with_address(mut self, address: Option<impl Into<String>>) -> Self {
        self.address = address.map(Into::into).filter(|a: &String| !a.trim().is_empty());
        self
    }

    pub fn with_scope(mut self, scope: Option<i64>) -> Self {
        self.scope = scope;
        self
    }
}

/// Outcome of one evaluation. Computed, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanVerdict {
    pub blocked: bool,
    pub identity_banned: bool,
    pub address_banned: bool,
    pub bypassed_by_unban: bool,
    pub latest_unban_id: Option<i64>,
    /// The expiry sweep changed at least one record during this evaluation.
    pub expired_updated: bool,
    pub active_ban: Option<BanDetail>,
    pub identity_ban: Option<BanDetail>,
    pub address_ban: Option<BanDetail>,
}

impl BanVerdict {
    /// Verdict assembled from the cache tier, which knows nothing about unbans or record ids.
    pub fn from_tiers(identity_banned: bool, address_banned: bool) -> Self {
        Self {
            blocked: identity_banned || address_banned,
            identity_banned,
            address_banned,
            ..Default::default()
        }
    }

    pub fn admitted() -> Self {
        Self::default()
    }

    pub fn blocked_unverified() -> Self {
        Self {
            blocked: true,
            ..Default::default()
        }
    }
}
