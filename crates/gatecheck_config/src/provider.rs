use std::{fs, path::Path};

use tracing::{debug, info};

use crate::{GatecheckConfig, LogType, error::ConfigError};

impl GatecheckConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatecheckConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(
            log_type = LogType::Config.as_str(),
            "Loading configuration from {}",
            path.display()
        );

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&content)?;
        info!(
            log_type = LogType::Config.as_str(),
            "Configuration loaded from {} (store: {}, cache: {}, relay: {})",
            path.display(),
            config.ban_check.has_store(),
            config.cache.enabled,
            config.relay.enabled
        );
        Ok(config)
    }
}
