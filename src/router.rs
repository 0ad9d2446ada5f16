//! Inbound classification: button reply vs. free text vs. nothing usable.

use tracing::debug;

use crate::bus::{InboundEvent, InboundKind, RawInbound};

/// Classify a raw transport message into an [`InboundEvent`].
///
/// A button-reply field wins over text; a message with neither (media-only,
/// reactions, protocol noise) is discarded. Malformed events are dropped,
/// never propagated as errors.
pub fn classify(raw: RawInbound) -> Option<InboundEvent> {
    if raw.chat.is_empty() {
        debug!("discarding inbound event without chat address");
        return None;
    }

    if let Some(button) = raw.button {
        if button.id.is_empty() {
            debug!("discarding button reply without id from {}", raw.chat);
            return None;
        }
        return Some(InboundEvent {
            chat: raw.chat,
            kind: InboundKind::ButtonReply {
                id: button.id,
                text: button.text,
            },
            received_at: raw.received_at,
        });
    }

    match raw.text {
        Some(text) if !text.trim().is_empty() => Some(InboundEvent {
            chat: raw.chat,
            kind: InboundKind::Text(text),
            received_at: raw.received_at,
        }),
        _ => {
            debug!("discarding inbound event without text content from {}", raw.chat);
            None
        }
    }
}
