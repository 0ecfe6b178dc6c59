use async_trait::async_trait;
use gatecheck_config::LogType;
use tracing::debug;

use crate::{
    BanError, BanQuery, BanTarget, BanVerdict,
    decider::BanSource,
    storage::{BanStorage, BanStorageBackend},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationOptions {
    pub check_ip_bans: bool,
    /// Only records of this server scope are considered.
    pub scope: Option<i64>,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            check_ip_bans: true,
            scope: None,
        }
    }
}

/// Turns store queries into a single verdict: lazy expiry first, then the
/// two tier counts, then the unban bypass for address-only matches.
#[derive(Debug, Clone)]
pub struct BanEvaluator {
    storage: BanStorage,
    options: EvaluationOptions,
}

impl BanEvaluator {
    pub fn new(storage: BanStorage, options: EvaluationOptions) -> Self {
        Self { storage, options }
    }

    pub fn options(&self) -> EvaluationOptions {
        self.options
    }

    /// Query for one client, honoring the address and scope options.
    pub fn query(&self, identity: &str, address: Option<&str>) -> BanQuery {
        BanQuery::new(identity)
            .with_address(address.filter(|_| self.options.check_ip_bans))
            .with_scope(self.options.scope)
    }

    pub async fn evaluate(
        &self,
        identity: &str,
        address: Option<&str>,
    ) -> Result<BanVerdict, BanError> {
        self.evaluate_query(&self.query(identity, address)).await
    }

    pub async fn evaluate_query(&self, query: &BanQuery) -> Result<BanVerdict, BanError> {
        let query = if self.options.check_ip_bans || query.address.is_none() {
            query.clone()
        } else {
            BanQuery {
                address: None,
                ..query.clone()
            }
        };
        let scope = query.scope;
        let identity = BanTarget::Identity(&query.identity);
        let address = query.address.as_deref().map(BanTarget::Address);

        // Must run before counting so an elapsed ban never counts as active
        let expired = self.storage.expire_elapsed(&query).await?;

        let identity_banned = self.storage.count_active(identity, scope).await? > 0;
        let address_banned = match address {
            Some(target) => self.storage.count_active(target, scope).await? > 0,
            None => false,
        };

        let active_ban = self.storage.latest_active(&query).await?;
        let identity_ban = self.storage.latest_active_for(identity, scope).await?;
        let address_ban = match address {
            Some(target) => self.storage.latest_active_for(target, scope).await?,
            None => None,
        };
        let latest_unban_id = self
            .storage
            .latest_unban_id(&query.identity, scope)
            .await?;

        // Record ids stand in for insertion order
        let bypassed_by_unban = address_banned
            && !identity_banned
            && latest_unban_id.is_some_and(|unban_id| {
                address_ban.as_ref().is_none_or(|ban| ban.id <= unban_id)
            });

        let verdict = BanVerdict {
            blocked: identity_banned || (address_banned && !bypassed_by_unban),
            identity_banned,
            address_banned,
            bypassed_by_unban,
            latest_unban_id,
            expired_updated: expired > 0,
            active_ban,
            identity_ban,
            address_ban,
        };

        debug!(
            log_type = LogType::BanSystem.as_str(),
            "Evaluated {} (address: {:?}, scope: {:?}): blocked={} identity={} address={} bypass={} unban_id={:?} expired={}",
            query.identity,
            query.address,
            scope,
            verdict.blocked,
            verdict.identity_banned,
            verdict.address_banned,
            verdict.bypassed_by_unban,
            verdict.latest_unban_id,
            expired
        );

        Ok(verdict)
    }
}

#[async_trait]
impl BanSource for BanEvaluator {
    fn name(&self) -> &'static str {
        "authority"
    }

    async fn check(&self, query: &BanQuery) -> Result<BanVerdict, BanError> {
        self.evaluate_query(query).await
    }
}
