//! Events published on the bus by the admission pipeline and by admin tooling.

use serde_json::Value;

/// An administrative action worth telling other processes about.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminActivity {
    pub message_key: String,
    pub caller_name: Option<String>,
    pub message_args: Value,
    /// Set by callers that only want local display, never relaying.
    pub dont_publish: bool,
}

impl AdminActivity {
    pub fn new(message_key: impl Into<String>, caller_name: Option<String>, message_args: Value) -> Self {
        Self {
            message_key: message_key.into(),
            caller_name,
            message_args,
            dont_publish: false,
        }
    }

    pub fn local_only(mut self) -> Self {
        self.dont_publish = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBlocked {
    pub slot: u32,
    pub identity: String,
    pub address: Option<String>,
    pub ban_id: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAdmitted {
    pub slot: u32,
    pub identity: String,
    pub expired_ban_processed: bool,
    pub bypassed_by_unban: bool,
}
