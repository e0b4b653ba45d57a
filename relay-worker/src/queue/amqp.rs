//! RabbitMQ queue backend using lapin.
//!
//! The backend keeps one persistent connection and channel, reconnecting
//! lazily when the channel is gone. Receipts are delivery tags qualified by
//! the channel generation they were issued on, since a tag is meaningless
//! (and acking it fatal to the channel) once the channel has been replaced.
//!
//! RabbitMQ has no visibility window: an unacknowledged entry stays claimed
//! until it is acked or its channel closes, at which point it is redelivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{
        BasicAckOptions, BasicGetOptions, BasicPublishOptions, ConfirmSelectOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{QueueEntry, QueueError, QueueService, ReceiveOptions};

/// Default queue name when none is configured.
pub const DEFAULT_AMQP_QUEUE: &str = "webhook_relay";

/// Pause between empty `basic_get` calls while long-polling.
const GET_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// RabbitMQ-backed queue with connection management.
#[derive(Clone)]
pub struct AmqpQueue {
    inner: Arc<AmqpInner>,
}

struct AmqpInner {
    url: String,
    queue_name: String,
    session: RwLock<Option<Session>>,
    generations: AtomicU64,
}

struct Session {
    connection: Connection,
    channel: Channel,
    generation: u64,
}

impl AmqpQueue {
    /// Create a backend for `queue_name` on the broker at `url`. Connects on first use.
    pub fn new(url: String, queue_name: String) -> Self {
        Self {
            inner: Arc::new(AmqpInner {
                url,
                queue_name,
                session: RwLock::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.queue_name
    }

    /// Ensure we have a connected channel, returning it with its generation.
    async fn ensure_connected(&self) -> Result<(Channel, u64)> {
        {
            let session = self.inner.session.read().await;
            if let Some(s) = session.as_ref() {
                if s.channel.status().connected() {
                    return Ok((s.channel.clone(), s.generation));
                }
            }
        }

        let mut session = self.inner.session.write().await;

        // Double-check after acquiring write lock
        if let Some(s) = session.as_ref() {
            if s.channel.status().connected() {
                return Ok((s.channel.clone(), s.generation));
            }
        }

        info!("rabbitmq_connecting");

        let connection = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        let channel = connection
            .create_channel()
            .await
            .context("Failed to create channel")?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        channel
            .queue_declare(
                &self.inner.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare queue")?;

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            queue = %self.inner.queue_name,
            generation = generation,
            "rabbitmq_connected"
        );

        *session = Some(Session {
            connection,
            channel: channel.clone(),
            generation,
        });

        Ok((channel, generation))
    }
}

fn encode_receipt(generation: u64, delivery_tag: u64) -> String {
    format!("{generation}:{delivery_tag}")
}

fn decode_receipt(receipt: &str) -> Option<(u64, u64)> {
    let (generation, tag) = receipt.split_once(':')?;
    Some((generation.parse().ok()?, tag.parse().ok()?))
}

#[async_trait]
impl QueueService for AmqpQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        let (channel, _) = self
            .ensure_connected()
            .await
            .map_err(|e| QueueError::Connection(format!("{e:#}")))?;

        let message_id = Uuid::new_v4().to_string();

        let confirmation = channel
            .basic_publish(
                "",
                &self.inner.queue_name,
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.clone().into()),
            )
            .await
            .map_err(|e| QueueError::Send(e.to_string()))?
            .await
            .map_err(|e| QueueError::Send(e.to_string()))?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(QueueError::Send("broker refused the message".to_string()));
        }

        debug!(
            queue = %self.inner.queue_name,
            message_id = %message_id,
            body_length = body.len(),
            "rabbitmq_published"
        );

        Ok(message_id)
    }

    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueEntry>, QueueError> {
        let (channel, generation) = self
            .ensure_connected()
            .await
            .map_err(|e| QueueError::Connection(format!("{e:#}")))?;

        let deadline = Instant::now() + options.wait_time;
        let mut entries = Vec::new();

        while entries.len() < options.max_messages as usize {
            let message = channel
                .basic_get(&self.inner.queue_name, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| QueueError::Receive(e.to_string()))?;

            match message {
                Some(message) => {
                    let delivery = message.delivery;
                    let message_id = delivery
                        .properties
                        .message_id()
                        .as_ref()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    entries.push(QueueEntry {
                        message_id,
                        receipt: encode_receipt(generation, delivery.delivery_tag),
                        body: String::from_utf8_lossy(&delivery.data).into_owned(),
                    });
                }
                None => {
                    let now = Instant::now();
                    if !entries.is_empty() || now >= deadline {
                        break;
                    }
                    sleep(GET_RETRY_INTERVAL.min(deadline - now)).await;
                }
            }
        }

        Ok(entries)
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let (generation, delivery_tag) = decode_receipt(receipt)
            .ok_or_else(|| QueueError::Delete(format!("malformed receipt {receipt}")))?;

        let session = self.inner.session.read().await;
        let channel = match session.as_ref() {
            Some(s) if s.generation == generation && s.channel.status().connected() => {
                s.channel.clone()
            }
            _ => {
                return Err(QueueError::Delete(format!(
                    "receipt {receipt} belongs to a closed channel"
                )))
            }
        };
        drop(session);

        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Delete(e.to_string()))
    }

    async fn close(&self) {
        let mut session = self.inner.session.write().await;

        if let Some(s) = session.take() {
            if let Err(e) = s.channel.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
            if let Err(e) = s.connection.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_round_trip() {
        let receipt = encode_receipt(3, 42);
        assert_eq!(receipt, "3:42");
        assert_eq!(decode_receipt(&receipt), Some((3, 42)));
    }

    #[test]
    fn test_decode_receipt_rejects_malformed() {
        assert_eq!(decode_receipt("42"), None);
        assert_eq!(decode_receipt("a:1"), None);
        assert_eq!(decode_receipt("1:"), None);
    }

    #[tokio::test]
    async fn test_delete_without_session_fails() {
        let queue = AmqpQueue::new(
            "amqp://localhost:5672".to_string(),
            DEFAULT_AMQP_QUEUE.to_string(),
        );

        let err = queue.delete("1:1").await.unwrap_err();
        assert!(matches!(err, QueueError::Delete(_)));

        let err = queue.delete("garbage").await.unwrap_err();
        assert!(matches!(err, QueueError::Delete(_)));
    }

    #[test]
    fn test_queue_creation() {
        let queue = AmqpQueue::new(
            "amqp://localhost:5672".to_string(),
            DEFAULT_AMQP_QUEUE.to_string(),
        );
        assert_eq!(queue.queue_name(), "webhook_relay");
        assert_eq!(Arc::strong_count(&queue.inner), 1);
    }
}
