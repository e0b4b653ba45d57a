//! Queue module: the envelope format, the queue service seam and its backends.
//!
//! This module provides:
//! - The `WebhookEnvelope` carried through the queue
//! - The `QueueService` trait implemented by each backend
//! - `Publisher`, the ingress-side producer
//!
//! ## Architecture
//!
//! ```text
//! Ingress → Publisher → QueueService → Consumer → RelayClient → relay target
//! ```

pub mod amqp;
pub mod envelope;
pub mod memory;
pub mod publisher;
pub mod sqs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use amqp::AmqpQueue;
pub use envelope::{WebhookEnvelope, DEFAULT_EXCLUDED_HEADER_PREFIX};
pub use memory::MemoryQueue;
pub use publisher::Publisher;
pub use sqs::SqsQueue;

use crate::config::{QueueBackend, QueueConfig};

/// Errors reported by a queue backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("connection failed: {0}")]
    Connection(String),
}

/// One claimed entry, as handed out by `QueueService::receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Queue-assigned message identifier.
    pub message_id: String,
    /// Single-use delete token, valid for the current visibility window.
    pub receipt: String,
    /// Serialized envelope.
    pub body: String,
}

/// Parameters of one batched receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Upper bound on entries returned.
    pub max_messages: u32,
    /// How long to block when nothing is immediately available.
    pub wait_time: Duration,
    /// How long claimed entries stay hidden from other receivers.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 3,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(1),
        }
    }
}

/// An at-least-once queue with visibility windows and delete-by-receipt.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Enqueue a body and return the queue-assigned message id.
    async fn send(&self, body: String) -> Result<String, QueueError>;

    /// Claim up to `options.max_messages` entries, long-polling if none are ready.
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueEntry>, QueueError>;

    /// Delete a claimed entry. Stale or reused receipts fail without side effects.
    async fn delete(&self, receipt: &str) -> Result<(), QueueError>;

    /// Release any connections held by the backend.
    async fn close(&self) {}
}

/// Build the queue backend selected by the configuration.
pub async fn connect(config: &QueueConfig) -> Result<Arc<dyn QueueService>> {
    match &config.backend {
        QueueBackend::Sqs {
            queue_url,
            region,
            endpoint_url,
        } => {
            info!(region = %region, endpoint_override = endpoint_url.is_some(), "queue_backend_sqs");
            let queue = SqsQueue::connect(queue_url, region, endpoint_url.as_deref()).await;
            Ok(Arc::new(queue))
        }
        QueueBackend::Amqp { url, queue_name } => {
            info!(queue = %queue_name, url_length = url.len(), "queue_backend_amqp");
            Ok(Arc::new(AmqpQueue::new(url.clone(), queue_name.clone())))
        }
    }
}
