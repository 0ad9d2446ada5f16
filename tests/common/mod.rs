// Shared test helpers — not all items used by every test binary.
#![allow(unused)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use clinigate::bus::{OutboundAction, RawButtonReply, RawInbound};
use clinigate::session::{ReconnectPolicy, SessionManager};
use clinigate::transport::{Transport, TransportEvent};

/// In-memory transport: records every delivered action and lets tests drive
/// lifecycle and message events.
pub struct MockTransport {
    connects: AtomicUsize,
    delivered: Mutex<Vec<(String, OutboundAction)>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<(String, OutboundAction)> {
        self.delivered.lock().unwrap().clone()
    }

    /// Bodies of delivered plain-text actions, in order.
    pub fn delivered_texts(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .filter_map(|(_, action)| match action {
                OutboundAction::Text { body } => Some(body),
                _ => None,
            })
            .collect()
    }

    pub async fn emit(&self, event: TransportEvent) {
        let tx = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("transport not connected");
        tx.send(event).await.expect("session event loop gone");
    }

    pub async fn emit_text(&self, chat: &str, text: &str) {
        self.emit(TransportEvent::Message(RawInbound {
            chat: chat.to_string(),
            text: Some(text.to_string()),
            button: None,
            received_at: Utc::now(),
        }))
        .await;
    }

    pub async fn emit_button(&self, chat: &str, id: &str, label: &str) {
        self.emit(TransportEvent::Message(RawInbound {
            chat: chat.to_string(),
            text: None,
            button: Some(RawButtonReply {
                id: id.to_string(),
                text: label.to_string(),
            }),
            received_at: Utc::now(),
        }))
        .await;
    }

    pub async fn emit_media_only(&self, chat: &str) {
        self.emit(TransportEvent::Message(RawInbound {
            chat: chat.to_string(),
            text: None,
            button: None,
            received_at: Utc::now(),
        }))
        .await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn deliver(&self, chat: &str, action: &OutboundAction) -> anyhow::Result<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((chat.to_string(), action.clone()));
        Ok(())
    }
}

/// Millisecond-scale reconnect cadence so lifecycle tests run fast.
pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(30),
        max_delay: Duration::from_millis(150),
        resume_delay: Duration::from_millis(10),
    }
}

/// Let spawned tasks and the session event loop catch up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

/// A session driven through connect + open, ready to send.
pub async fn connected_session(
    transport: &Arc<MockTransport>,
) -> (
    Arc<SessionManager>,
    mpsc::Receiver<clinigate::bus::RawInbound>,
) {
    let (session, inbound) = SessionManager::new(transport.clone(), fast_policy());
    session.connect().await.unwrap();
    transport
        .emit(TransportEvent::Opened {
            user: Some("34911222333".into()),
        })
        .await;
    settle().await;
    (session, inbound)
}
