use std::time::Duration;

use serde::Deserialize;

/// What the admission pipeline does when the ban store cannot be reached and
/// no cache is available to answer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    #[default]
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BanCheckConfig {
    /// MySQL key-value string (`Server=...;Uid=...`), `mysql://` URL, or a
    /// SQLite path / `Data Source=` string. Empty disables store checks.
    pub connection_string: String,

    pub server_id: Option<i64>,

    pub check_ip_bans: bool,

    pub use_server_scope: bool,

    pub resolve_max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub resolve_retry_delay: Duration,

    pub send_join_message: bool,

    pub store_failure: StoreFailurePolicy,

    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,

    pub max_connections: u32,
}

impl BanCheckConfig {
    pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

    pub fn effective_retry_delay(&self) -> Duration {
        self.resolve_retry_delay.max(Self::MIN_RETRY_DELAY)
    }

    /// Server scope applied to store queries, if scoping is enabled and an id is known.
    pub fn scope(&self) -> Option<i64> {
        if self.use_server_scope {
            self.server_id
        } else {
            None
        }
    }

    pub fn has_store(&self) -> bool {
        !self.connection_string.trim().is_empty()
    }
}

impl Default for BanCheckConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            server_id: None,
            check_ip_bans: true,
            use_server_scope: true,
            resolve_max_attempts: 20,
            resolve_retry_delay: Duration::from_millis(100),
            send_join_message: true,
            store_failure: StoreFailurePolicy::FailOpen,
            store_timeout: Duration::from_secs(5),
            max_connections: 4,
        }
    }
}
