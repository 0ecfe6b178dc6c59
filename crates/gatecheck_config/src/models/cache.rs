use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Interval of the background snapshot refresh. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval: Duration::from_secs(60),
        }
    }
}
