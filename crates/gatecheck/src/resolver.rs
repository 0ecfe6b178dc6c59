use std::time::Duration;

use gatecheck_config::BanCheckConfig;

use crate::host::{SessionHost, Slot};

/// A client whose identity is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClient {
    pub identity: String,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStep {
    Resolved(ResolvedClient),
    /// Poll again after `delay`, as attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Gave up after `attempts` retries.
    Exhausted { attempts: u32 },
}

/// Bounded polling of a slot until the host has attached an identity.
///
/// Attempts are numbered from zero; the resolver retries while the attempt
/// number is below `max_attempts`, so an absent session gets exactly
/// `max_attempts` retries before it is reported exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityResolver {
    max_attempts: u32,
    retry_delay: Duration,
}

impl IdentityResolver {
    pub const MIN_RETRY_DELAY: Duration = BanCheckConfig::MIN_RETRY_DELAY;

    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay: retry_delay.max(Self::MIN_RETRY_DELAY),
        }
    }

    pub fn from_config(config: &BanCheckConfig) -> Self {
        Self::new(config.resolve_max_attempts, config.effective_retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn poll<H: SessionHost + ?Sized>(&self, host: &H, slot: Slot, attempt: u32) -> ResolveStep {
        let resolved = host
            .session(slot)
            .filter(|session| session.qualifies())
            .and_then(|session| {
                let identity = session.resolved_identity()?.to_string();
                Some(ResolvedClient {
                    identity,
                    name: session.name,
                    address: session.address,
                })
            });

        match resolved {
            Some(client) => ResolveStep::Resolved(client),
            None if attempt < self.max_attempts => ResolveStep::Retry {
                attempt: attempt + 1,
                delay: self.retry_delay,
            },
            None => ResolveStep::Exhausted { attempts: attempt },
        }
    }
}
