//! Transport seam: the WhatsApp connection primitive, treated as opaque.
//!
//! The session manager owns the single live connection through this trait;
//! everything above it is transport-agnostic (and testable with an in-memory
//! implementation).

pub mod chunk;
#[cfg(feature = "transport-whatsapp")]
pub mod whatsapp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{OutboundAction, RawInbound};

/// Lifecycle and message events emitted by a transport over the channel
/// handed to [`Transport::connect`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing QR payload is available; the session is not yet open.
    QrAvailable(String),
    /// The connection is open and authenticated.
    Opened { user: Option<String> },
    /// The connection closed. `recoverable` is false only for an explicit
    /// logout/deauthorization, which requires fresh pairing.
    Closed { reason: String, recoverable: bool },
    /// An inbound message arrived.
    Message(RawInbound),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and start emitting events on `events`.
    /// Returns once the connection attempt is underway; the outcome is
    /// reported through `Opened`/`Closed` events.
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()>;

    /// Tear down any live connection or in-flight connect attempt.
    async fn disconnect(&self);

    /// Serialize and submit one outbound action to `chat`.
    /// An error means the transport rejected the submission.
    async fn deliver(&self, chat: &str, action: &OutboundAction) -> anyhow::Result<()>;
}

/// Normalize a phone-number-derived chat address: strip a leading `+`,
/// whitespace, any `@domain` suffix, and any `:device` suffix.
pub fn normalize_phone(raw: &str) -> String {
    let without_domain = raw.split('@').next().unwrap_or(raw);
    let without_device = without_domain.split(':').next().unwrap_or(without_domain);
    without_device
        .trim_start_matches('+')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_plain_number() {
        assert_eq!(normalize_phone("34600000000"), "34600000000");
    }

    #[test]
    fn normalize_strips_plus_and_spaces() {
        assert_eq!(normalize_phone("+34 600 000 000"), "34600000000");
    }

    #[test]
    fn normalize_strips_domain_and_device() {
        assert_eq!(
            normalize_phone("34600000000:20@s.whatsapp.net"),
            "34600000000"
        );
        assert_eq!(normalize_phone("34600000000@s.whatsapp.net"), "34600000000");
    }
}
