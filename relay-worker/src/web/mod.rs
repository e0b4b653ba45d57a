//! Web server module for handling inbound webhooks.
//!
//! This module provides a thin, fast web server that:
//! - Receives signed webhooks on any path
//! - Verifies the HMAC-SHA1 signature
//! - Immediately enqueues the envelope
//! - Returns the queue message id
//!
//! Relaying to the target happens in the consumer process.

pub mod handlers;
pub mod signature;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub use handlers::{health, receive_webhook, AppState, HealthResponse};
pub use signature::{compute_signature, verify_signature};

/// Build the ingress router. Everything except `GET /health` is treated as a
/// webhook, including other methods on `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health).fallback(receive_webhook))
        .fallback(receive_webhook)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
