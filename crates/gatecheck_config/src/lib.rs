pub mod error;
pub mod models;
pub mod provider;

pub use error::ConfigError;
pub use models::GatecheckConfig;
pub use models::ban_check::{BanCheckConfig, StoreFailurePolicy};
pub use models::cache::CacheConfig;
pub use models::logging::{LogType, LoggingConfig};
pub use models::relay::RelayConfig;
