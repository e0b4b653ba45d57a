//! Webhook endpoint handlers.
//!
//! The ingress handler is deliberately thin - it only:
//! 1. Verifies the HMAC signature over the raw body
//! 2. Wraps body and headers into an envelope
//! 3. Enqueues the envelope and answers with the queue message id
//!
//! Delivery to the relay target happens in the consumer process.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::IngressConfig;
use crate::error::RelayError;
use crate::queue::{Publisher, WebhookEnvelope};
use crate::web::signature::verify_signature;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IngressConfig>,
    pub publisher: Publisher,
}

impl AppState {
    pub fn new(config: IngressConfig, publisher: Publisher) -> Self {
        Self {
            config: Arc::new(config),
            publisher,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Webhook Ingress
// =============================================================================

/// Webhook ingress endpoint.
///
/// Answers `200` with the queue message id, `403` when the signature does not
/// match, and `500` when the webhook could not be enqueued.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let claimed = headers
        .get(state.config.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    info!(
        event = headers
            .get("X-GitHub-Event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
        body_length = body.len(),
        has_signature = !claimed.is_empty(),
        "webhook_received"
    );

    if let Err(e) = verify_signature(state.config.webhook_secret.as_bytes(), &body, claimed) {
        return error_response(StatusCode::FORBIDDEN, &e);
    }

    let envelope = match build_envelope(&headers, &body, &state.config.excluded_header_prefix) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, "webhook_envelope_failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e);
        }
    };

    match state.publisher.publish(&envelope).await {
        Ok(message_id) => {
            info!(message_id = %message_id, "webhook_enqueued");
            (StatusCode::OK, message_id).into_response()
        }
        Err(e) => {
            error!(error = %e, kind = e.kind(), "webhook_enqueue_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

/// Build the envelope from the raw request.
///
/// The envelope carries the body as text, so a body that is not UTF-8 cannot
/// be queued without altering it and is refused.
fn build_envelope(
    headers: &HeaderMap,
    body: &Bytes,
    excluded_prefix: &str,
) -> Result<WebhookEnvelope, RelayError> {
    let payload = std::str::from_utf8(body)
        .map_err(|e| RelayError::Serialize(format!("body is not UTF-8: {e}")))?;

    let pairs = headers.iter().filter_map(|(name, value)| match value.to_str() {
        Ok(value) => Some((name.as_str(), value)),
        Err(_) => {
            warn!(header = %name, "webhook_header_not_text");
            None
        }
    });

    Ok(WebhookEnvelope::from_request(pairs, payload, excluded_prefix))
}

fn error_response(status: StatusCode, err: &RelayError) -> Response {
    (status, err.to_string()).into_response()
}
