//! Single entry point for "is this client banned?".
//!
//! The authoritative source (the evaluator over the store) always wins when it
//! answers. When it fails, the cache answers if one is configured, otherwise
//! the failure policy decides.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use gatecheck_config::{LogType, StoreFailurePolicy};
use tracing::{debug, error, warn};

use crate::{BanCache, BanError, BanQuery, BanVerdict};

#[async_trait]
pub trait BanSource: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    async fn check(&self, query: &BanQuery) -> Result<BanVerdict, BanError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Admit clients that could not be verified.
    #[default]
    FailOpen,
    FailClosed,
}

impl From<StoreFailurePolicy> for FailurePolicy {
    fn from(policy: StoreFailurePolicy) -> Self {
        match policy {
            StoreFailurePolicy::FailOpen => FailurePolicy::FailOpen,
            StoreFailurePolicy::FailClosed => FailurePolicy::FailClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Authority,
    Cache,
    FailOpen,
    FailClosed,
    /// No ban source is configured.
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: BanVerdict,
    pub source: VerdictSource,
    /// Set when the authoritative source failed and a fallback answered.
    pub store_error: Option<String>,
}

impl Decision {
    pub fn is_authoritative(&self) -> bool {
        self.source == VerdictSource::Authority
    }
}

#[derive(Debug, Clone, Default)]
pub struct BanDecider {
    authority: Option<Arc<dyn BanSource>>,
    cache: Option<Arc<BanCache>>,
    policy: FailurePolicy,
    timeout: Option<Duration>,
}

impl BanDecider {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn with_authority(mut self, authority: Arc<dyn BanSource>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn with_cache(mut self, cache: Arc<BanCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Authoritative checks slower than this count as store failures.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn cache(&self) -> Option<&Arc<BanCache>> {
        self.cache.as_ref()
    }

    pub fn has_authority(&self) -> bool {
        self.authority.is_some()
    }

    /// Instant cache answer, for logging only; `None` without a cache.
    pub fn precheck(&self, query: &BanQuery) -> Option<bool> {
        self.cache
            .as_ref()
            .map(|cache| cache.is_banned(Some(&query.identity), query.address.as_deref()))
    }

    pub async fn decide(&self, query: &BanQuery) -> Decision {
        let Some(authority) = &self.authority else {
            return self.fallback(query, None).await;
        };

        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, authority.check(query))
                .await
                .unwrap_or(Err(BanError::Timeout(timeout))),
            None => authority.check(query).await,
        };

        match result {
            Ok(verdict) => {
                if let Some(cache) = &self.cache {
                    cache.record(query, &verdict);
                }
                Decision {
                    verdict,
                    source: VerdictSource::Authority,
                    store_error: None,
                }
            }
            Err(e) => {
                error!(
                    log_type = LogType::BanSystem.as_str(),
                    identity = %query.identity,
                    operation = "evaluate",
                    source = authority.name(),
                    "Ban store unavailable: {}", e
                );
                self.fallback(query, Some(e.to_string())).await
            }
        }
    }

    async fn fallback(&self, query: &BanQuery, store_error: Option<String>) -> Decision {
        if let Some(cache) = &self.cache {
            match cache.check(query).await {
                Ok(verdict) => {
                    debug!(
                        log_type = LogType::Cache.as_str(),
                        "Cache answered for {}: blocked={}", query.identity, verdict.blocked
                    );
                    return Decision {
                        verdict,
                        source: VerdictSource::Cache,
                        store_error,
                    };
                }
                Err(e) => {
                    warn!(
                        log_type = LogType::Cache.as_str(),
                        "Cache lookup failed for {}: {}", query.identity, e
                    );
                }
            }
        }

        if store_error.is_none() && self.authority.is_none() {
            return Decision {
                verdict: BanVerdict::admitted(),
                source: VerdictSource::Unchecked,
                store_error,
            };
        }

        let (verdict, source) = match self.policy {
            FailurePolicy::FailOpen => (BanVerdict::admitted(), VerdictSource::FailOpen),
            FailurePolicy::FailClosed => (BanVerdict::blocked_unverified(), VerdictSource::FailClosed),
        };

        warn!(
            log_type = LogType::BanSystem.as_str(),
            "Could not verify {}, applying {:?}", query.identity, self.policy
        );

        Decision {
            verdict,
            source,
            store_error,
        }
    }
}
