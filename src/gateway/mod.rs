//! HTTP API surface of the gateway.
//!
//! Thin handlers: validate input, delegate to the composer and the session,
//! report structured success/failure. No business logic lives here.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::bus::Button;
use crate::compose::{self, AppointmentData, ConsentData, PatientData};
use crate::errors::{GatewayError, GatewayResult};
use crate::session::{SessionManager, SessionState};
use crate::transport::normalize_phone;

/// Pause between the consent document and its follow-up button menu, so the
/// recipient sees them in composition order.
pub const DEFAULT_CONSENT_DELAY: Duration = Duration::from_millis(1500);

pub struct GatewayState {
    pub session: Arc<SessionManager>,
    pub started_at: Instant,
    pub consent_delay: Duration,
}

impl GatewayState {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            started_at: Instant::now(),
            consent_delay: DEFAULT_CONSENT_DELAY,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    phone_number: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReminderRequest {
    phone_number: Option<String>,
    appointment_data: Option<AppointmentData>,
}

#[derive(Debug, Deserialize)]
struct ConsentRequest {
    phone_number: Option<String>,
    consent_data: Option<ConsentData>,
}

#[derive(Debug, Deserialize)]
struct SurveyRequest {
    phone_number: Option<String>,
    patient_data: Option<PatientData>,
}

#[derive(Debug, Deserialize)]
struct InteractiveRequest {
    phone_number: Option<String>,
    message: Option<String>,
    buttons: Option<Vec<Button>>,
}

#[derive(Debug, Deserialize)]
struct DocumentRequest {
    phone_number: Option<String>,
    message: Option<String>,
    document_path: Option<String>,
    file_name: Option<String>,
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/qr", get(qr_handler))
        .route("/send", post(send_handler))
        .route("/send-reminder", post(send_reminder_handler))
        .route("/send-consent", post(send_consent_handler))
        .route("/send-survey", post(send_survey_handler))
        .route("/send-interactive", post(send_interactive_handler))
        .route("/send-document", post(send_document_handler))
        .route("/reconnect", post(reconnect_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Start the HTTP API server; serves until the process exits.
pub async fn serve(
    host: &str,
    port: u16,
    state: Arc<GatewayState>,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("gateway API listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("gateway API server error: {}", e);
        }
    }))
}

fn ok() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"success": true})))
}

fn failure(err: &GatewayError) -> (StatusCode, Json<Value>) {
    let status = match err {
        GatewayError::TooManyButtons { .. } | GatewayError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    (
        status,
        Json(json!({
            "success": false,
            "error": err.code(),
            "detail": err.to_string(),
        })),
    )
}

fn missing_field(name: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "error": "missing_field",
            "detail": format!("{} is required", name),
        })),
    )
}

fn send_result(result: GatewayResult<()>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => ok(),
        Err(err) => failure(&err),
    }
}

/// Extract a required non-empty string field.
fn require(value: Option<String>, name: &str) -> Result<String, (StatusCode, Json<Value>)> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(missing_field(name)),
    }
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let snapshot = state.session.snapshot();
    Json(json!({
        "connected": snapshot.state == SessionState::Connected,
        "status": snapshot.status_label(),
        "user": snapshot.user,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn qr_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let snapshot = state.session.snapshot();
    if snapshot.state == SessionState::Connected {
        return Json(json!({
            "qr": null,
            "status": "connected",
            "message": "La sesión de WhatsApp ya está vinculada",
        }));
    }
    match snapshot.qr {
        Some(qr) => Json(json!({
            "qr": qr,
            "status": "qr_ready",
            "message": "Escanea el código QR con WhatsApp para vincular la sesión",
        })),
        None => Json(json!({
            "qr": null,
            "status": snapshot.status_label(),
            "message": "Código QR no disponible todavía",
        })),
    }
}

async fn send_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<SendRequest>,
) -> (StatusCode, Json<Value>) {
    let phone = match require(body.phone_number, "phone_number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let message = match require(body.message, "message") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let chat = normalize_phone(&phone);
    send_result(state.session.send(&chat, &compose::plain(message)).await)
}

async fn send_reminder_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<ReminderRequest>,
) -> (StatusCode, Json<Value>) {
    let phone = match require(body.phone_number, "phone_number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(appointment) = body.appointment_data else {
        return missing_field("appointment_data");
    };

    let action = match compose::reminder(&appointment) {
        Ok(action) => action,
        Err(err) => return failure(&err),
    };
    let chat = normalize_phone(&phone);
    send_result(state.session.send(&chat, &action).await)
}

async fn send_consent_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<ConsentRequest>,
) -> (StatusCode, Json<Value>) {
    let phone = match require(body.phone_number, "phone_number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(consent) = body.consent_data else {
        return missing_field("consent_data");
    };

    let document = match &consent.document_path {
        Some(path) => match read_document(path).await {
            Ok(bytes) => {
                let filename = consent
                    .file_name
                    .clone()
                    .unwrap_or_else(|| basename(path).to_string());
                Some((bytes, filename))
            }
            Err(err) => return failure(&err),
        },
        None => None,
    };

    let actions = match compose::consent_flow(&consent, document) {
        Ok(actions) => actions,
        Err(err) => return failure(&err),
    };

    let chat = normalize_phone(&phone);
    for (i, action) in actions.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(state.consent_delay).await;
        }
        if let Err(err) = state.session.send(&chat, action).await {
            return failure(&err);
        }
    }
    ok()
}

async fn send_survey_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<SurveyRequest>,
) -> (StatusCode, Json<Value>) {
    let phone = match require(body.phone_number, "phone_number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patient = body.patient_data.unwrap_or(PatientData { contact_name: None });

    let chat = normalize_phone(&phone);
    send_result(state.session.send(&chat, &compose::survey(&patient)).await)
}

async fn send_interactive_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<InteractiveRequest>,
) -> (StatusCode, Json<Value>) {
    let phone = match require(body.phone_number, "phone_number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let message = match require(body.message, "message") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(buttons) = body.buttons else {
        return missing_field("buttons");
    };

    let action = match compose::with_buttons(message, buttons) {
        Ok(action) => action,
        Err(err) => return failure(&err),
    };
    let chat = normalize_phone(&phone);
    send_result(state.session.send(&chat, &action).await)
}

async fn send_document_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<DocumentRequest>,
) -> (StatusCode, Json<Value>) {
    let phone = match require(body.phone_number, "phone_number") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let path = match require(body.document_path, "document_path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let bytes = match read_document(&path).await {
        Ok(bytes) => bytes,
        Err(err) => return failure(&err),
    };
    let filename = body
        .file_name
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| basename(&path).to_string());
    let caption = body.message.unwrap_or_default();

    let action = compose::with_document(caption, bytes, filename);
    let chat = normalize_phone(&phone);
    send_result(state.session.send(&chat, &action).await)
}

async fn reconnect_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    state.session.force_reconnect().await;
    Json(json!({
        "success": true,
        "status": "reconnecting",
    }))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": crate::SERVICE_NAME,
        "version": crate::VERSION,
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

/// Read a document from disk; a missing or unreadable file maps to
/// `DocumentNotFound` and the transport is never touched.
async fn read_document(path: &str) -> GatewayResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|_| GatewayError::DocumentNotFound(path.to_string()))
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("documento.pdf")
}
