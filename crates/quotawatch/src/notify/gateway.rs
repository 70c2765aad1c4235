//! Outbound messaging seams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::diff::ChangeEvent;
use crate::registry::UserId;

/// Identifies a public notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned by the messaging gateways.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient can't be reached (blocked DMs, deleted account, ...)
    #[error("Recipient unreachable: {reason}")]
    Unreachable { reason: String },

    /// Rate limits, timeouts and other failures worth retrying later
    #[error("Transient delivery failure: {reason}")]
    Transient { reason: String },
}

impl DeliveryError {
    /// Returns true if this failure should count as a strike.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryError::Unreachable { .. })
    }
}

/// A message sent straight to one subscriber.
#[derive(Debug, Clone, Copy)]
pub enum DirectMessage<'a> {
    /// A change to a course the subscriber follows
    Change(&'a ChangeEvent),
    /// First message to a pending subscriber
    Confirmation,
}

/// Posts to public channels.
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    async fn send(&self, destination: &ChannelKey, event: &ChangeEvent) -> Result<(), DeliveryError>;

    /// Posts a plain-text operational notice.
    async fn send_notice(&self, destination: &ChannelKey, text: &str) -> Result<(), DeliveryError>;
}

/// Sends direct messages to subscribers.
#[async_trait]
pub trait DirectGateway: Send + Sync {
    async fn send_direct(&self, user: &UserId, message: DirectMessage<'_>) -> Result<(), DeliveryError>;
}
