//! Webhook Relay - queue-buffered delivery of signed webhooks.
//!
//! This library provides the shared modules for the two run modes of the
//! `webhook-relay` binary:
//! - `ingress`: thin web server that verifies and enqueues webhooks
//! - `relay`: queue consumer that forwards webhooks to the build server
//!
//! ## Architecture
//!
//! ```text
//! Webhooks → Ingress → queue (SQS or RabbitMQ) → Consumer → relay target
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod queue;
pub mod relay;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, Mode, ModeConfig};
pub use consumer::Consumer;
pub use error::RelayError;
pub use queue::{Publisher, QueueEntry, QueueError, QueueService, WebhookEnvelope};
pub use relay::{RelayClient, RelayOutcome};
pub use web::AppState;
