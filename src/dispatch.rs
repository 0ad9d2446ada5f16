//! Button-reply dispatch: the static button table, the collaborator-backend
//! notification and the degraded path through the AI bridge.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::ai::AiBridge;
use crate::bus::{InboundEvent, InboundKind};
use crate::compose;
use crate::session::SessionManager;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// The closed set of buttons this gateway ever offers. Each variant carries
/// its fixed acknowledgement and, where the flow continues, a follow-up
/// question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonCommand {
    ConfirmAppointment,
    CancelAppointment,
    RescheduleAppointment,
    AcceptConsent,
    ExplainConsent,
    AcceptLopd,
    LopdInfo,
}

impl ButtonCommand {
    pub fn parse(id: &str) -> Option<Self> {
        match id {
            compose::BTN_CONFIRM_APPOINTMENT => Some(Self::ConfirmAppointment),
            compose::BTN_CANCEL_APPOINTMENT => Some(Self::CancelAppointment),
            compose::BTN_RESCHEDULE_APPOINTMENT => Some(Self::RescheduleAppointment),
            compose::BTN_CONSENT_ACCEPT => Some(Self::AcceptConsent),
            compose::BTN_CONSENT_EXPLAIN => Some(Self::ExplainConsent),
            compose::BTN_LOPD_ACCEPT => Some(Self::AcceptLopd),
            compose::BTN_LOPD_INFO => Some(Self::LopdInfo),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::ConfirmAppointment => compose::BTN_CONFIRM_APPOINTMENT,
            Self::CancelAppointment => compose::BTN_CANCEL_APPOINTMENT,
            Self::RescheduleAppointment => compose::BTN_RESCHEDULE_APPOINTMENT,
            Self::AcceptConsent => compose::BTN_CONSENT_ACCEPT,
            Self::ExplainConsent => compose::BTN_CONSENT_EXPLAIN,
            Self::AcceptLopd => compose::BTN_LOPD_ACCEPT,
            Self::LopdInfo => compose::BTN_LOPD_INFO,
        }
    }

    pub fn acknowledgement(self) -> &'static str {
        match self {
            Self::ConfirmAppointment => {
                "✅ ¡Perfecto! Tu cita ha quedado confirmada. Te esperamos en la clínica."
            }
            Self::CancelAppointment => {
                "❌ Tu cita ha sido cancelada. Si quieres una nueva cita, escríbenos por aquí o llama a recepción."
            }
            Self::RescheduleAppointment => {
                "🔄 Entendido, vamos a buscar una nueva fecha para tu cita."
            }
            Self::AcceptConsent => {
                "✅ Gracias. Hemos registrado tu aceptación del consentimiento informado."
            }
            Self::ExplainConsent => "ℹ️ Con gusto te lo explicamos.",
            Self::AcceptLopd => {
                "✅ Gracias. Hemos registrado tu conformidad con el tratamiento de tus datos personales."
            }
            Self::LopdInfo => "ℹ️ Sobre la protección de tus datos:",
        }
    }

    pub fn follow_up(self) -> Option<&'static str> {
        match self {
            Self::RescheduleAppointment => Some(
                "¿Qué día y hora te vendrían mejor? Escríbenos tu preferencia y te confirmaremos la disponibilidad.",
            ),
            Self::ExplainConsent => Some(
                "El consentimiento informado describe el tratamiento propuesto, sus riesgos y las alternativas disponibles. Si tienes cualquier duda, escríbela aquí y te la resolvemos antes de firmar.",
            ),
            Self::LopdInfo => Some(
                "Tratamos tus datos únicamente para la gestión de tus citas y tu historial clínico, conforme al RGPD y la LOPDGDD. Puedes ejercer tus derechos de acceso, rectificación o supresión en recepción.",
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NotifyResponse {
    #[serde(default)]
    reply_message: Option<String>,
}

/// Fire-and-forget notifier for the collaborator backend. One attempt per
/// button press; failures are logged and swallowed.
pub struct BackendNotifier {
    client: Client,
    base_url: String,
}

impl BackendNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into(),
        }
    }

    /// Report a button press. Returns the backend's optional extra reply.
    pub async fn notify_button(
        &self,
        phone_number: &str,
        button_id: &str,
        selected_text: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<String> {
        let url = format!("{}/api/whatsapp/button-response", self.base_url);
        let payload = json!({
            "phone_number": phone_number,
            "button_id": button_id,
            "selected_text": selected_text,
            "timestamp": timestamp.to_rfc3339(),
        });

        let result = self.client.post(&url).json(&payload).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => resp
                .json::<NotifyResponse>()
                .await
                .ok()
                .and_then(|r| r.reply_message),
            Ok(resp) => {
                warn!(
                    "backend rejected button notification for {}: {}",
                    phone_number,
                    resp.status()
                );
                None
            }
            Err(e) => {
                warn!(
                    "backend button notification failed for {}: {}",
                    phone_number, e
                );
                None
            }
        }
    }
}

/// Resolves classified inbound events: button replies against the static
/// table, everything else through the AI bridge.
pub struct ActionDispatcher {
    session: Arc<SessionManager>,
    ai: Arc<AiBridge>,
    backend: Arc<BackendNotifier>,
}

impl ActionDispatcher {
    pub fn new(
        session: Arc<SessionManager>,
        ai: Arc<AiBridge>,
        backend: Arc<BackendNotifier>,
    ) -> Self {
        Self {
            session,
            ai,
            backend,
        }
    }

    /// Handle one inbound event end to end. Failures are logged; this never
    /// returns an error so the pipeline task cannot die on one bad event.
    pub async fn handle(&self, event: InboundEvent) {
        match &event.kind {
            InboundKind::Text(text) => {
                self.respond_with_ai(&event.chat, text).await;
            }
            InboundKind::ButtonReply { id, text } => match ButtonCommand::parse(id) {
                Some(command) => self.handle_command(&event, command, text).await,
                None => {
                    // Degrade gracefully: treat the display text as if the
                    // patient had typed it.
                    debug!("unknown button id '{}' from {}, routing to AI", id, event.chat);
                    self.respond_with_ai(&event.chat, text).await;
                }
            },
        }
    }

    async fn handle_command(&self, event: &InboundEvent, command: ButtonCommand, text: &str) {
        // The notification must not delay the chat reply; it runs
        // concurrently and is attempted exactly once.
        let backend = self.backend.clone();
        let chat = event.chat.clone();
        let selected = text.to_string();
        let received_at = event.received_at;
        let notify = tokio::spawn(async move {
            backend
                .notify_button(&chat, command.id(), &selected, received_at)
                .await
        });

        self.send_text(&event.chat, command.acknowledgement()).await;
        if let Some(question) = command.follow_up() {
            self.send_text(&event.chat, question).await;
        }

        if let Ok(Some(reply)) = notify.await
            && !reply.is_empty()
        {
            self.send_text(&event.chat, &reply).await;
        }
    }

    async fn respond_with_ai(&self, chat: &str, message: &str) {
        let reply = self.ai.reply(chat, message).await;
        self.send_text(chat, &reply).await;
    }

    async fn send_text(&self, chat: &str, body: &str) {
        if let Err(e) = self.session.send(chat, &compose::plain(body)).await {
            warn!("failed to reply to {}: {}", chat, e);
        }
    }
}
