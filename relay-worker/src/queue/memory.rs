//! In-process queue backend.
//!
//! Behaves like a managed at-least-once queue: received entries are hidden for
//! the visibility window and come back if they are not deleted in time, and
//! each receive issues a fresh receipt that invalidates the previous one.

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use super::{QueueEntry, QueueError, QueueService, ReceiveOptions};

struct StoredMessage {
    message_id: String,
    body: String,
    visible_at: Instant,
    receipt: Option<String>,
    receive_count: u32,
}

/// In-memory queue shared by producer and consumer within one process.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<StoredMessage>>,
    arrived: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries not yet deleted, visible or not.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// How many times the given message has been handed out.
    pub async fn receive_count(&self, message_id: &str) -> Option<u32> {
        self.messages
            .lock()
            .await
            .iter()
            .find(|m| m.message_id == message_id)
            .map(|m| m.receive_count)
    }

    async fn claim_visible(&self, options: &ReceiveOptions) -> Vec<QueueEntry> {
        let now = Instant::now();
        let mut messages = self.messages.lock().await;
        let mut claimed = Vec::new();

        for message in messages.iter_mut() {
            if claimed.len() >= options.max_messages as usize {
                break;
            }
            if message.visible_at > now {
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            message.visible_at = now + options.visibility_timeout;
            message.receipt = Some(receipt.clone());
            message.receive_count += 1;

            claimed.push(QueueEntry {
                message_id: message.message_id.clone(),
                receipt,
                body: message.body.clone(),
            });
        }

        claimed
    }
}

#[async_trait]
impl QueueService for MemoryQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();

        self.messages.lock().await.push(StoredMessage {
            message_id: message_id.clone(),
            body,
            visible_at: Instant::now(),
            receipt: None,
            receive_count: 0,
        });
        self.arrived.notify_waiters();

        Ok(message_id)
    }

    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueEntry>, QueueError> {
        if options.max_messages == 0 {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + options.wait_time;

        loop {
            // Register interest before looking, so a send in between is not missed.
            let arrived = self.arrived.notified();

            let claimed = self.claim_visible(options).await;
            if !claimed.is_empty() || Instant::now() >= deadline {
                return Ok(claimed);
            }

            // Hidden entries may become visible again before anything new arrives.
            let next_visible = self
                .messages
                .lock()
                .await
                .iter()
                .map(|m| m.visible_at)
                .min();
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));

            let _ = timeout_at(wake_at, arrived).await;
        }
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let mut messages = self.messages.lock().await;
        let position = messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt));

        match position {
            Some(index) => {
                messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::Delete(format!("receipt {receipt} is not valid"))),
        }
    }
}
