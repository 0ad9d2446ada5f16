//! Outbound payload construction. Pure — no I/O happens here; reading
//! document bytes and submitting actions is the caller's job.

use serde::Deserialize;

use crate::bus::{Button, OutboundAction};
use crate::errors::{GatewayError, GatewayResult};

/// WhatsApp renders at most three quick-reply buttons per message.
pub const MAX_BUTTONS: usize = 3;

pub const BTN_CONFIRM_APPOINTMENT: &str = "confirm_appointment";
pub const BTN_CANCEL_APPOINTMENT: &str = "cancel_appointment";
pub const BTN_RESCHEDULE_APPOINTMENT: &str = "reschedule_appointment";
pub const BTN_CONSENT_ACCEPT: &str = "consent_accept";
pub const BTN_CONSENT_EXPLAIN: &str = "consent_explain";
pub const BTN_LOPD_ACCEPT: &str = "lopd_accept";
pub const BTN_LOPD_INFO: &str = "lopd_info";

pub fn plain(text: impl Into<String>) -> OutboundAction {
    OutboundAction::Text { body: text.into() }
}

/// Build a button-menu action. Over-limit or empty button lists are
/// rejected, never truncated.
pub fn with_buttons(text: impl Into<String>, buttons: Vec<Button>) -> GatewayResult<OutboundAction> {
    if buttons.is_empty() {
        return Err(GatewayError::Config("button menu needs at least one button".into()));
    }
    if buttons.len() > MAX_BUTTONS {
        return Err(GatewayError::TooManyButtons {
            got: buttons.len(),
            max: MAX_BUTTONS,
        });
    }
    Ok(OutboundAction::Buttons {
        body: text.into(),
        buttons,
    })
}

/// Build a document action from already-read bytes. The MIME type is
/// inferred from the filename extension.
pub fn with_document(
    caption: impl Into<String>,
    bytes: Vec<u8>,
    filename: impl Into<String>,
) -> OutboundAction {
    let filename = filename.into();
    let mime_type = mime_for(&filename).to_string();
    OutboundAction::Document {
        caption: caption.into(),
        bytes,
        filename,
        mime_type,
    }
}

fn mime_for(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentData {
    pub contact_name: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub doctor: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
}

/// Appointment reminder: fixed template plus confirm/cancel/reschedule menu.
pub fn reminder(appointment: &AppointmentData) -> GatewayResult<OutboundAction> {
    let mut body = format!(
        "📅 *Recordatorio de cita*\n\nHola {}, te recordamos tu próxima cita:\n\n🗓 Fecha: {}\n🕐 Hora: {}",
        appointment.contact_name, appointment.date, appointment.time
    );
    if let Some(doctor) = &appointment.doctor {
        body.push_str(&format!("\n👩‍⚕️ Profesional: {}", doctor));
    }
    if let Some(treatment) = &appointment.treatment {
        body.push_str(&format!("\n🦷 Tratamiento: {}", treatment));
    }
    body.push_str("\n\n¿Podrás asistir?");

    with_buttons(
        body,
        vec![
            Button::new(BTN_CONFIRM_APPOINTMENT, "✅ Confirmar"),
            Button::new(BTN_CANCEL_APPOINTMENT, "❌ Cancelar"),
            Button::new(BTN_RESCHEDULE_APPOINTMENT, "🔄 Reprogramar"),
        ],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentKind {
    Treatment,
    Lopd,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentData {
    #[serde(rename = "consent_type")]
    pub kind: ConsentKind,
    #[serde(default)]
    pub treatment: Option<String>,
    /// Path to the consent document; resolved and read by the caller.
    #[serde(default)]
    pub document_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Consent flow: optional document first, then the consent question with
/// its buttons. The sender preserves this order with a short delay in
/// between so the recipient sees the document before the question.
pub fn consent_flow(
    consent: &ConsentData,
    document: Option<(Vec<u8>, String)>,
) -> GatewayResult<Vec<OutboundAction>> {
    let mut actions = Vec::new();

    if let Some((bytes, filename)) = document {
        actions.push(with_document(
            "📄 Te adjuntamos el documento para que puedas leerlo con calma.",
            bytes,
            filename,
        ));
    }

    let menu = match consent.kind {
        ConsentKind::Treatment => {
            let body = match &consent.treatment {
                Some(treatment) => format!(
                    "Para continuar con tu tratamiento de {}, necesitamos tu conformidad con el consentimiento informado. ¿Lo aceptas?",
                    treatment
                ),
                None => "Para continuar con tu tratamiento, necesitamos tu conformidad con el consentimiento informado. ¿Lo aceptas?".to_string(),
            };
            with_buttons(
                body,
                vec![
                    Button::new(BTN_CONSENT_ACCEPT, "✅ Acepto"),
                    Button::new(BTN_CONSENT_EXPLAIN, "ℹ️ Necesito más información"),
                ],
            )?
        }
        ConsentKind::Lopd => with_buttons(
            "Para gestionar tus citas necesitamos tratar tus datos personales conforme al RGPD. ¿Nos das tu consentimiento?",
            vec![
                Button::new(BTN_LOPD_ACCEPT, "✅ Acepto"),
                Button::new(BTN_LOPD_INFO, "ℹ️ Más información"),
            ],
        )?,
    };
    actions.push(menu);

    Ok(actions)
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientData {
    #[serde(default)]
    pub contact_name: Option<String>,
}

/// Post-visit satisfaction survey. Answers come back as free text and are
/// parsed by the collaborator backend, not here.
pub fn survey(patient: &PatientData) -> OutboundAction {
    let greeting = match &patient.contact_name {
        Some(name) => format!("Hola {}", name),
        None => "Hola".to_string(),
    };
    plain(format!(
        "⭐ *Encuesta de satisfacción*\n\n{}, nos encantaría conocer tu opinión sobre tu última visita:\n\n1️⃣ ¿Cómo valorarías la atención recibida? (1-5)\n2️⃣ ¿Cómo valorarías la puntualidad? (1-5)\n3️⃣ ¿Recomendarías nuestra clínica? (sí/no)\n\nResponde a este mensaje con tus valoraciones. ¡Muchas gracias!",
        greeting
    ))
}
