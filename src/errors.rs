use thiserror::Error;

/// Typed error hierarchy for the gateway.
///
/// Use at module boundaries (sends, composition, configuration). Internal/leaf
/// functions can continue using `anyhow::Result` — the `Internal` variant
/// allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not connected to WhatsApp")]
    NotConnected,

    #[error("transport rejected send: {0}")]
    Transport(String),

    #[error("too many buttons: {got} (transport limit is {max})")]
    TooManyButtons { got: usize, max: usize },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("AI bridge failure: {0}")]
    AiBridge(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `GatewayError`.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Stable machine-readable code, used in HTTP error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NotConnected => "not_connected",
            GatewayError::Transport(_) => "transport_error",
            GatewayError::TooManyButtons { .. } => "too_many_buttons",
            GatewayError::DocumentNotFound(_) => "document_not_found",
            GatewayError::AiBridge(_) => "ai_bridge_failure",
            GatewayError::Config(_) => "config_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}
