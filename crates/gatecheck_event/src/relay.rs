//! Republishes [`AdminActivity`] events as JSON on a named channel.
//!
//! The transport is pluggable through [`ActivityPublisher`]; the crate only
//! ships an in-process broadcast publisher.

use std::sync::Arc;

use gatecheck_config::LogType;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::{AdminActivity, EventBus};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish to channel '{channel}' failed: {message}")]
    Publish { channel: String, message: String },
}

pub trait ActivityPublisher: Send + Sync + 'static {
    fn publish(&self, channel: &str, payload: String) -> Result<(), RelayError>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivityMessage<'a> {
    message_key: &'a str,
    caller_name: Option<&'a str>,
    message_args: &'a Value,
}

pub fn encode_activity(activity: &AdminActivity) -> Result<String, RelayError> {
    let message = ActivityMessage {
        message_key: &activity.message_key,
        caller_name: activity.caller_name.as_deref(),
        message_args: &activity.message_args,
    };
    Ok(serde_json::to_string(&message)?)
}

pub struct ActivityRelay<P: ActivityPublisher> {
    channel: String,
    publisher: Arc<P>,
}

impl<P: ActivityPublisher> Clone for ActivityRelay<P> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<P: ActivityPublisher> ActivityRelay<P> {
    pub fn new(channel: impl Into<String>, publisher: Arc<P>) -> Self {
        Self {
            channel: channel.into(),
            publisher,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publishes one activity. Returns `Ok(false)` when the activity opted out.
    pub fn relay(&self, activity: &AdminActivity) -> Result<bool, RelayError> {
        if activity.dont_publish {
            debug!(
                log_type = LogType::Relay.as_str(),
                "Skipping local-only activity '{}'", activity.message_key
            );
            return Ok(false);
        }

        let payload = encode_activity(activity)?;
        self.publisher.publish(&self.channel, payload)?;
        Ok(true)
    }

    /// Subscribes this relay to every [`AdminActivity`] emitted on `bus`.
    pub fn attach(self, bus: &EventBus) {
        bus.on::<AdminActivity, _>(move |activity| {
            if let Err(e) = self.relay(activity) {
                error!(
                    log_type = LogType::Relay.as_str(),
                    "Failed to relay activity '{}': {}", activity.message_key, e
                );
            }
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMessage {
    pub channel: String,
    pub payload: String,
}

/// In-process publisher; subscribers get every message sent after they subscribed.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<RelayedMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayedMessage> {
        self.sender.subscribe()
    }
}

impl ActivityPublisher for BroadcastPublisher {
    fn publish(&self, channel: &str, payload: String) -> Result<(), RelayError> {
        let message = RelayedMessage {
            channel: channel.to_string(),
            payload,
        };

        if self.sender.send(message).is_err() {
            debug!(
                log_type = LogType::Relay.as_str(),
                "No subscribers on channel '{}', message dropped", channel
            );
        }
        Ok(())
    }
}
