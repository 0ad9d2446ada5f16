//! Value types flowing between the transport, the router and the senders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound message as the transport saw it, before classification.
#[derive(Debug, Clone)]
pub struct RawInbound {
    /// Canonical chat address (phone-number-derived, no device suffix).
    pub chat: String,
    pub text: Option<String>,
    pub button: Option<RawButtonReply>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RawButtonReply {
    pub id: String,
    pub text: String,
}

/// A classified inbound event. Ephemeral — consumed once, never persisted.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat: String,
    pub kind: InboundKind,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum InboundKind {
    Text(String),
    ButtonReply { id: String, text: String },
}

impl InboundEvent {
    /// Conversation key passed to the AI endpoint for continuity.
    pub fn session_key(&self) -> String {
        format!("whatsapp:{}", self.chat)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub label: String,
}

impl Button {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// An outbound payload, fully built before it touches the transport.
/// Handed to the session atomically: either fully sent or reported failed.
#[derive(Debug, Clone)]
pub enum OutboundAction {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<Button>,
    },
    Document {
        caption: String,
        bytes: Vec<u8>,
        filename: String,
        mime_type: String,
    },
}

impl OutboundAction {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundAction::Text { .. } => "text",
            OutboundAction::Buttons { .. } => "buttons",
            OutboundAction::Document { .. } => "document",
        }
    }
}
