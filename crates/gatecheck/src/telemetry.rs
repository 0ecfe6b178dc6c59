use std::collections::HashMap;

use gatecheck_config::{LogType, LoggingConfig};
use tracing::{
    Event, Level, Metadata, Subscriber, debug,
    field::{Field, Visit},
    level_filters::LevelFilter,
};
use tracing_subscriber::{
    EnvFilter, Layer, fmt,
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::error::AdmissionError;

/// Level filter keyed on the `log_type` field every event carries.
///
/// Events without a known `log_type` fall back to the base level.
#[derive(Debug, Clone)]
pub struct LogTypeFilter {
    base: Level,
    type_levels: HashMap<&'static str, Level>,
}

impl LogTypeFilter {
    pub fn from_config(config: &LoggingConfig) -> Self {
        let type_levels = config
            .log_types
            .iter()
            .filter_map(|(name, level)| Some((LogType::from_name(name)?.as_str(), parse_level(level)?)))
            .collect();

        Self {
            base: parse_level(&config.level).unwrap_or(Level::INFO),
            type_levels,
        }
    }

    pub fn level_for(&self, log_type: Option<&str>) -> Level {
        log_type
            .and_then(|name| self.type_levels.get(name))
            .copied()
            .unwrap_or(self.base)
    }

    pub fn allows(&self, level: &Level, log_type: Option<&str>) -> bool {
        level <= &self.level_for(log_type)
    }

    fn most_verbose(&self) -> Level {
        self.type_levels.values().copied().fold(self.base, Level::max)
    }
}

fn parse_level(level: &str) -> Option<Level> {
    level.trim().parse().ok()
}

impl<S: Subscriber> Layer<S> for LogTypeFilter {
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        metadata.level() <= &self.most_verbose()
    }

    fn event_enabled(&self, event: &Event<'_>, _ctx: Context<'_, S>) -> bool {
        let mut visitor = LogTypeVisitor::default();
        event.record(&mut visitor);
        self.allows(event.metadata().level(), visitor.log_type.as_deref())
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        Some(LevelFilter::from_level(self.most_verbose()))
    }
}

#[derive(Debug, Default)]
struct LogTypeVisitor {
    log_type: Option<String>,
}

impl Visit for LogTypeVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "log_type" {
            self.log_type = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "log_type" {
            self.log_type = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the config.
pub fn init_logging(config: &LoggingConfig) -> Result<(), AdmissionError> {
    let env_filter = EnvFilter::try_from_default_env().ok();
    let type_filter = env_filter
        .is_none()
        .then(|| LogTypeFilter::from_config(config));

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_target(config.show_target));
    let text_layer = (!config.json).then(|| fmt::layer().with_target(config.show_target));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(type_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| AdmissionError::Logging(e.to_string()))?;

    debug!(
        log_type = LogType::Config.as_str(),
        "Logging initialized at level {}", config.level
    );
    Ok(())
}
