use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,

    pub json: bool,

    pub show_target: bool,

    /// Per `log_type` level overrides, e.g. `ban_check = "debug"`.
    pub log_types: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            show_target: false,
            log_types: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    BanCheck,
    BanSystem,
    Cache,
    Relay,
    Config,
    Scheduler,
}

impl LogType {
    pub const ALL: [LogType; 6] = [
        LogType::BanCheck,
        LogType::BanSystem,
        LogType::Cache,
        LogType::Relay,
        LogType::Config,
        LogType::Scheduler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::BanCheck => "ban_check",
            LogType::BanSystem => "ban_system",
            LogType::Cache => "cache",
            LogType::Relay => "relay",
            LogType::Config => "config",
            LogType::Scheduler => "scheduler",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}
