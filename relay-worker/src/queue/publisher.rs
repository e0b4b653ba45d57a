//! Ingress-side producer: encodes envelopes and hands them to the queue.
//!
//! The publisher is cheap to clone and is shared across all concurrent
//! ingress requests.

use std::sync::Arc;

use tracing::info;

use super::{QueueService, WebhookEnvelope};
use crate::error::RelayError;

/// Publishes webhook envelopes to the relay queue.
#[derive(Clone)]
pub struct Publisher {
    queue: Arc<dyn QueueService>,
}

impl Publisher {
    pub fn new(queue: Arc<dyn QueueService>) -> Self {
        Self { queue }
    }

    /// Serialize the envelope and enqueue it, returning the queue's message id.
    pub async fn publish(&self, envelope: &WebhookEnvelope) -> Result<String, RelayError> {
        let body = envelope.to_json()?;
        let body_length = body.len();

        let message_id = self.queue.send(body).await.map_err(RelayError::Enqueue)?;

        info!(
            message_id = %message_id,
            event = envelope.event().unwrap_or("unknown"),
            body_length = body_length,
            "queue_envelope_published"
        );

        Ok(message_id)
    }

    /// Close the underlying queue connection.
    pub async fn close(&self) {
        self.queue.close().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::queue::{MemoryQueue, QueueEntry, QueueError, ReceiveOptions};

    /// Queue whose every call fails, for exercising error paths.
    pub(crate) struct FailingQueue;

    #[async_trait]
    impl QueueService for FailingQueue {
        async fn send(&self, _body: String) -> Result<String, QueueError> {
            Err(QueueError::Send("queue unavailable".to_string()))
        }

        async fn receive(&self, _options: &ReceiveOptions) -> Result<Vec<QueueEntry>, QueueError> {
            Err(QueueError::Receive("queue unavailable".to_string()))
        }

        async fn delete(&self, _receipt: &str) -> Result<(), QueueError> {
            Err(QueueError::Delete("queue unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_publish_returns_message_id() {
        let queue = Arc::new(MemoryQueue::new());
        let publisher = Publisher::new(queue.clone());
        let envelope =
            WebhookEnvelope::from_request(vec![("X-GitHub-Event", "push")], "{\"x\":1}", "");

        let message_id = publisher.publish(&envelope).await.unwrap();
        assert!(!message_id.is_empty());

        let entries = queue.receive(&ReceiveOptions::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message_id, message_id);
        assert_eq!(WebhookEnvelope::from_json(&entries[0].body).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_publish_surfaces_queue_failure() {
        let publisher = Publisher::new(Arc::new(FailingQueue));
        let envelope = WebhookEnvelope::from_request(Vec::new(), "{}", "");

        let err = publisher.publish(&envelope).await.unwrap_err();
        match err {
            RelayError::Enqueue(cause) => {
                assert_eq!(cause, QueueError::Send("queue unavailable".to_string()))
            }
            other => panic!("Expected Enqueue error, got {other:?}"),
        }
    }
}
