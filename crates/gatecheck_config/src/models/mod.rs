pub mod ban_check;
pub mod cache;
pub mod logging;
pub mod relay;

use serde::Deserialize;

use crate::error::ConfigError;

use self::{ban_check::BanCheckConfig, cache::CacheConfig, logging::LoggingConfig, relay::RelayConfig};

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GatecheckConfig {
    pub ban_check: BanCheckConfig,
    pub cache: CacheConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

impl GatecheckConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ban_check.max_connections == 0 {
            return Err(ConfigError::invalid(
                "ban_check.max_connections must be at least 1",
            ));
        }

        if self.ban_check.store_timeout.is_zero() {
            return Err(ConfigError::invalid("ban_check.store_timeout must not be zero"));
        }

        if self.cache.enabled && !self.ban_check.has_store() {
            return Err(ConfigError::invalid(
                "cache.enabled requires ban_check.connection_string to be set",
            ));
        }

        if self.relay.enabled && self.relay.channel.trim().is_empty() {
            return Err(ConfigError::invalid("relay.channel must not be empty"));
        }

        for (log_type, level) in &self.logging.log_types {
            if level.parse::<tracing::Level>().is_err() {
                return Err(ConfigError::invalid(format!(
                    "logging.log_types.{log_type}: unknown level '{level}'"
                )));
            }
        }

        Ok(())
    }
}
