//! Bridge to the external conversational-AI endpoint.
//!
//! The conversation must never go unanswered: every failure path resolves to
//! a fixed local fallback message, so `reply` is infallible by construction.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Sent verbatim whenever the AI endpoint is unreachable, times out or
/// returns garbage. A local constant so this path itself cannot fail.
pub const FALLBACK_MESSAGE: &str = "En este momento no puedo atender tu consulta. 🙏\n\nSi es urgente, llámanos directamente:\n📞 Clínica: 912 345 678\n📱 Urgencias 24h: 600 123 456\n\nTe responderemos lo antes posible.";

const URGENT_HEADER: &str = "🚨 *ATENCIÓN URGENTE* 🚨";
const URGENT_CONTACT: &str =
    "Si necesitas atención inmediata:\n📞 Clínica: 912 345 678\n📱 Urgencias 24h: 600 123 456";
const SCHEDULING_FOOTER: &str = "📅 Para agendar tu cita puedes llamarnos al 912 345 678 o responder a este mensaje con tu disponibilidad.";

#[derive(Debug, Serialize)]
struct AiRequest<'a> {
    message: &'a str,
    session_id: String,
    phone_number: &'a str,
    platform: &'static str,
}

#[derive(Debug, Deserialize)]
struct AiResponse {
    response: String,
    #[serde(default)]
    action_type: Option<String>,
    #[serde(default)]
    extracted_data: Option<Value>,
}

pub struct AiBridge {
    client: Client,
    endpoint: String,
}

impl AiBridge {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(request_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            endpoint: endpoint.into(),
        }
    }

    /// Produce the reply for a free-text message. Never fails — endpoint
    /// trouble resolves to [`FALLBACK_MESSAGE`].
    pub async fn reply(&self, chat: &str, message: &str) -> String {
        match self.request(chat, message).await {
            Ok(response) => {
                if let Some(data) = &response.extracted_data {
                    debug!("AI extracted data for {}: {}", chat, data);
                }
                decorate(response)
            }
            Err(e) => {
                warn!("AI bridge failure for {}: {}", chat, e);
                FALLBACK_MESSAGE.to_string()
            }
        }
    }

    async fn request(&self, chat: &str, message: &str) -> Result<AiResponse> {
        let payload = AiRequest {
            message,
            session_id: format!("whatsapp:{}", chat),
            phone_number: chat,
            platform: "whatsapp",
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("failed to reach AI endpoint")?;

        if !resp.status().is_success() {
            bail!("AI endpoint returned {}", resp.status());
        }

        resp.json::<AiResponse>()
            .await
            .context("malformed AI response body")
    }
}

/// Apply the action-type decoration to the AI's response text.
fn decorate(response: AiResponse) -> String {
    match response.action_type.as_deref() {
        Some("URGENT") => format!(
            "{}\n\n{}\n\n{}",
            URGENT_HEADER, response.response, URGENT_CONTACT
        ),
        Some("ROUTINE_APPOINTMENT") => {
            format!("{}\n\n{}", response.response, SCHEDULING_FOOTER)
        }
        _ => response.response,
    }
}
