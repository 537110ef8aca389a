//! Typed events produced from Open Live business payloads.
//!
//! The dispatcher turns `SEND_MESSAGE` payloads into an [`OpenLiveEvent`]; the
//! consumer receives a flattened [`ForwardedMessage`] built from it.

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Extra information about the sender shown next to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributes {
    /// Name of the fan badge the sender is wearing, empty when none.
    pub fan_badge_name: String,
    pub fan_badge_level: u32,
    /// 0 = none, 1 = monthly, 2 = yearly.
    pub vip_tier: u8,
    pub is_admin: bool,
    pub title: String,
}

/// A business event decoded from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpenLiveEvent {
    /// A regular chat comment.
    Comment {
        sender_name: String,
        sender_key: String,
        text: String,
        attributes: UserAttributes,
    },
    /// A paid (super chat) message. `amount` is in yuan, kept as sent.
    PaidMessage {
        sender_name: String,
        sender_key: String,
        text: String,
        amount: Number,
        attributes: UserAttributes,
    },
}

impl OpenLiveEvent {
    pub fn sender_name(&self) -> &str {
        match self {
            Self::Comment { sender_name, .. } | Self::PaidMessage { sender_name, .. } => {
                sender_name
            }
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Comment { text, .. } | Self::PaidMessage { text, .. } => text,
        }
    }
}

/// The record handed to the consumer callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardedMessage {
    /// Numeric user id. The Open Live channel only exposes opaque open ids, so
    /// this is absent for events coming from it.
    pub sender_id: Option<u64>,
    /// Opaque, stable per-user key (the Open Live `open_id`).
    pub sender_key: String,
    pub display_name: String,
    pub text: String,
    pub attributes: UserAttributes,
}

impl From<OpenLiveEvent> for ForwardedMessage {
    fn from(event: OpenLiveEvent) -> Self {
        match event {
            OpenLiveEvent::Comment {
                sender_name,
                sender_key,
                text,
                attributes,
            } => Self {
                sender_id: None,
                sender_key,
                display_name: sender_name,
                text,
                attributes,
            },
            OpenLiveEvent::PaidMessage {
                sender_name,
                sender_key,
                text,
                amount,
                attributes,
            } => Self {
                sender_id: None,
                sender_key,
                display_name: sender_name,
                text: format!("💰¥{} {}", amount, text),
                attributes,
            },
        }
    }
}
