//! Production transport backed by wa-rs (linked-device WhatsApp session).
//!
//! Credentials live in the wa-rs SQLite store under the configured session
//! directory, so a restart resumes the session without re-pairing.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use whatsapp_rust::proto_helpers::MessageExt;
use whatsapp_rust::wa_rs_proto::whatsapp as wa;

use crate::bus::{Button, OutboundAction, RawButtonReply, RawInbound};
use crate::transport::{Transport, TransportEvent, chunk, normalize_phone};

/// WhatsApp caps plain-text payloads well above this, but chunking at 4 KiB
/// keeps messages renderable on every client.
const TEXT_CHUNK_BYTES: usize = 4096;

pub struct WaTransport {
    session_dir: PathBuf,
    client: Arc<tokio::sync::Mutex<Option<Arc<whatsapp_rust::client::Client>>>>,
    bot_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WaTransport {
    pub fn new(session_dir: PathBuf) -> Self {
        Self {
            session_dir,
            client: Arc::new(tokio::sync::Mutex::new(None)),
            bot_handle: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WaTransport {
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        // Only one bot may run at a time; a reconnect supersedes the old one.
        self.disconnect().await;

        std::fs::create_dir_all(&self.session_dir).with_context(|| {
            format!(
                "failed to create session directory {}",
                self.session_dir.display()
            )
        })?;
        let session_db = self.session_dir.join("whatsapp.db");
        let session_db_str = session_db.to_string_lossy().to_string();
        debug!("WhatsApp session database: {}", session_db_str);

        let backend = whatsapp_rust::store::SqliteStore::new(&session_db_str)
            .await
            .map(Arc::new)
            .context("failed to open WhatsApp session store")?;

        let transport_factory =
            whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory::new();
        let http_client = whatsapp_rust_ureq_http_client::UreqHttpClient::new();

        // First close report wins; the bot-exit path stays quiet after a
        // lifecycle event already announced the close.
        let close_reported = Arc::new(AtomicBool::new(false));

        let handler_events = events.clone();
        let handler_reported = close_reported.clone();
        let client_slot = self.client.clone();

        let bot_builder = whatsapp_rust::bot::Bot::builder()
            .with_backend(backend)
            .with_transport_factory(transport_factory)
            .with_http_client(http_client)
            .on_event(move |event, client| {
                let events = handler_events.clone();
                let reported = handler_reported.clone();
                let client_slot = client_slot.clone();
                async move {
                    {
                        let mut guard = client_slot.lock().await;
                        *guard = Some(client.clone());
                    }
                    handle_wa_event(event, &events, &reported).await;
                }
            });

        let task_events = events;
        let task_reported = close_reported;
        let task = tokio::spawn(async move {
            match bot_builder.build().await {
                Ok(mut bot) => {
                    info!("WhatsApp bot built, connecting...");
                    match bot.run().await {
                        Ok(handle) => {
                            if let Err(e) = handle.await {
                                error!("WhatsApp bot task error: {}", e);
                            }
                        }
                        Err(e) => error!("WhatsApp bot run error: {}", e),
                    }
                }
                Err(e) => error!("failed to build WhatsApp bot: {}", e),
            }
            if !task_reported.swap(true, Ordering::SeqCst) {
                let _ = task_events
                    .send(TransportEvent::Closed {
                        reason: "connection task ended".to_string(),
                        recoverable: true,
                    })
                    .await;
            }
        });

        *self.bot_handle.lock().await = Some(task);
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.bot_handle.lock().await.take() {
            handle.abort();
        }
        *self.client.lock().await = None;
    }

    async fn deliver(&self, chat: &str, action: &OutboundAction) -> Result<()> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("WhatsApp client not ready"))?;
        let jid = format_jid(chat)?;

        match action {
            OutboundAction::Text { body } => {
                for piece in chunk::split_message(body, TEXT_CHUNK_BYTES) {
                    let message = wa::Message {
                        conversation: Some(piece),
                        ..Default::default()
                    };
                    send_proto(&client, &jid, message).await?;
                }
            }
            OutboundAction::Buttons { body, buttons } => {
                let message = buttons_proto(body, buttons);
                send_proto(&client, &jid, message).await?;
            }
            OutboundAction::Document {
                caption,
                bytes,
                filename,
                mime_type,
            } => {
                let upload = client
                    .upload(bytes.clone(), whatsapp_rust::download::MediaType::Document)
                    .await
                    .map_err(|e| anyhow!("WhatsApp media upload failed: {}", e))?;
                let message = wa::Message {
                    document_message: Some(Box::new(wa::message::DocumentMessage {
                        url: Some(upload.url),
                        direct_path: Some(upload.direct_path),
                        media_key: Some(upload.media_key),
                        file_enc_sha256: Some(upload.file_enc_sha256),
                        file_sha256: Some(upload.file_sha256),
                        file_length: Some(upload.file_length),
                        mimetype: Some(mime_type.clone()),
                        file_name: Some(filename.clone()),
                        title: Some(filename.clone()),
                        caption: Some(caption.clone()),
                        ..Default::default()
                    })),
                    ..Default::default()
                };
                send_proto(&client, &jid, message).await?;
            }
        }
        Ok(())
    }
}

async fn send_proto(
    client: &Arc<whatsapp_rust::client::Client>,
    jid: &whatsapp_rust::Jid,
    message: wa::Message,
) -> Result<()> {
    match Box::pin(client.send_message(jid.clone(), message)).await {
        Ok(msg_id) => {
            info!("WhatsApp message sent to {}: id={}", jid, msg_id);
            Ok(())
        }
        Err(e) => {
            error!("WhatsApp send to {} failed: {}", jid, e);
            Err(anyhow!("WhatsApp send error: {}", e))
        }
    }
}

fn buttons_proto(body: &str, buttons: &[Button]) -> wa::Message {
    let proto_buttons: Vec<wa::message::buttons_message::Button> = buttons
        .iter()
        .map(|b| wa::message::buttons_message::Button {
            button_id: Some(b.id.clone()),
            button_text: Some(wa::message::buttons_message::button::ButtonText {
                display_text: Some(b.label.clone()),
            }),
            r#type: Some(wa::message::buttons_message::button::Type::Response as i32),
            ..Default::default()
        })
        .collect();

    wa::Message {
        buttons_message: Some(Box::new(wa::message::ButtonsMessage {
            content_text: Some(body.to_string()),
            buttons: proto_buttons,
            header_type: Some(wa::message::buttons_message::HeaderType::Empty as i32),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Build a send JID: strip any device suffix and append the user domain.
/// Sends must not include the device id.
fn format_jid(chat: &str) -> Result<whatsapp_rust::Jid> {
    use std::str::FromStr;

    let jid_str = format!("{}@s.whatsapp.net", normalize_phone(chat));
    whatsapp_rust::Jid::from_str(&jid_str)
        .map_err(|e| anyhow!("invalid WhatsApp chat address '{}': {}", jid_str, e))
}

async fn handle_wa_event(
    event: whatsapp_rust::types::events::Event,
    events: &mpsc::Sender<TransportEvent>,
    close_reported: &Arc<AtomicBool>,
) {
    use whatsapp_rust::types::events::Event;

    match &event {
        Event::Message(msg, info) => {
            // Linked-device mode syncs the account's own outgoing messages
            // back to us; those are not patient traffic.
            if info.source.is_from_me {
                debug!("ignoring device-synced outgoing message");
                return;
            }

            let sender = info.source.sender.to_string();
            let chat = normalize_phone(&sender);
            let base = msg.get_base_message();
            let button = extract_button_reply(base);
            let text = if button.is_some() {
                None
            } else {
                msg.text_content().map(ToString::to_string)
            };

            let raw = RawInbound {
                chat,
                text,
                button,
                received_at: Utc::now(),
            };
            if let Err(e) = events.send(TransportEvent::Message(raw)).await {
                error!("failed to forward WhatsApp inbound message: {}", e);
            }
        }
        Event::PairingQrCode { code, .. } => {
            print_qr(code);
            if let Err(e) = events
                .send(TransportEvent::QrAvailable(code.clone()))
                .await
            {
                error!("failed to forward QR payload: {}", e);
            }
        }
        Event::PairingCode { code, .. } => {
            println!("\nWhatsApp pairing code: {}\nEnter this code on your phone.\n", code);
            info!("WhatsApp pairing code displayed");
        }
        Event::PairSuccess(_) => {
            info!("WhatsApp pairing successful");
        }
        Event::PairError(pair_error) => {
            error!("WhatsApp pairing failed: {:?}", pair_error);
        }
        Event::Connected(_) => {
            info!("WhatsApp connected");
            // The linked account's identity lives in the credential store;
            // wa-rs does not surface it on this event.
            if let Err(e) = events
                .send(TransportEvent::Opened { user: None })
                .await
            {
                error!("failed to forward connection open: {}", e);
            }
        }
        Event::Disconnected(_) => {
            warn!("WhatsApp disconnected");
            if !close_reported.swap(true, Ordering::SeqCst) {
                let _ = events
                    .send(TransportEvent::Closed {
                        reason: "transport disconnected".to_string(),
                        recoverable: true,
                    })
                    .await;
            }
        }
        Event::LoggedOut(_) => {
            warn!("WhatsApp session logged out; fresh pairing required");
            close_reported.store(true, Ordering::SeqCst);
            let _ = events
                .send(TransportEvent::Closed {
                    reason: "logged out".to_string(),
                    recoverable: false,
                })
                .await;
        }
        _ => {
            debug!(
                "WhatsApp event (not handled): {:?}",
                std::mem::discriminant(&event)
            );
        }
    }
}

fn extract_button_reply(base: &wa::Message) -> Option<RawButtonReply> {
    let reply = base.buttons_response_message.as_ref()?;
    let id = reply.selected_button_id.clone()?;
    let text = match reply.response.as_ref() {
        Some(wa::message::buttons_response_message::Response::SelectedDisplayText(t)) => t.clone(),
        None => String::new(),
    };
    Some(RawButtonReply { id, text })
}

/// Render the pairing QR in the terminal, falling back to the pure-Rust
/// renderer when qr2term cannot draw.
fn print_qr(code: &str) {
    println!("\nWhatsApp QR code:");
    match qr2term::print_qr(code) {
        Ok(()) => {
            println!("\nScan with WhatsApp: Settings > Linked Devices > Link a Device");
        }
        Err(e) => {
            warn!("qr2term failed: {}, falling back to qrcode crate", e);
            match qrcode::QrCode::new(code) {
                Ok(qr) => {
                    let rendered = qr
                        .render::<char>()
                        .quiet_zone(false)
                        .module_dimensions(2, 1)
                        .build();
                    println!("{}", rendered);
                }
                Err(e2) => {
                    warn!("failed to render QR code: {}. Raw payload: {}", e2, code);
                }
            }
            println!("\nScan with WhatsApp: Settings > Linked Devices > Link a Device");
        }
    }
}
