use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub channel: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: "gatecheck:activity".to_string(),
        }
    }
}
