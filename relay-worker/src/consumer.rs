//! Queue consumer loop.
//!
//! This module polls the queue in batches and, for each entry, deserializes
//! the envelope, relays it and deletes the entry. Entries are handled one at
//! a time, and every entry is deleted exactly once after its attempt,
//! whatever the outcome: there is no local retry and no dead-letter path.
//!
//! The loop runs until its cancellation token fires. Cancellation interrupts
//! the long-poll receive and the sleep between batches; an entry already
//! being relayed is finished and deleted first. Entries claimed but not yet
//! started go back to the queue when their visibility window expires.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::queue::{QueueEntry, QueueError, QueueService, ReceiveOptions, WebhookEnvelope};
use crate::relay::{RelayClient, RelayOutcome};

/// What happened to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Relayed and acknowledged with `200 OK`.
    Delivered,
    /// Relay attempted but failed (transport or status).
    RelayFailed,
    /// Body was not an envelope; never relayed.
    Malformed,
}

/// Outcome of processing one entry, including whether its deletion succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub message_id: String,
    pub outcome: EntryOutcome,
    pub deleted: bool,
}

/// Polls the queue and relays each entry to the target.
pub struct Consumer {
    queue: Arc<dyn QueueService>,
    relay: RelayClient,
    receive: ReceiveOptions,
    poll_interval: Duration,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn QueueService>,
        relay: RelayClient,
        receive: ReceiveOptions,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            relay,
            receive,
            poll_interval,
        }
    }

    /// Build a consumer from relay-mode configuration.
    pub fn from_config(queue: Arc<dyn QueueService>, config: &RelayConfig) -> anyhow::Result<Self> {
        let relay = RelayClient::new(config.target_url.clone(), config.request_timeout)?;
        Ok(Self::new(queue, relay, config.receive, config.poll_interval))
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            target_url = %self.relay.target(),
            max_messages = self.receive.max_messages,
            wait_seconds = self.receive.wait_time.as_secs(),
            visibility_timeout_seconds = self.receive.visibility_timeout.as_secs(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "relay_loop_started"
        );

        while !shutdown.is_cancelled() {
            match self.poll_once(&shutdown).await {
                Ok(reports) => {
                    if !reports.is_empty() {
                        let delivered = reports
                            .iter()
                            .filter(|r| r.outcome == EntryOutcome::Delivered)
                            .count();
                        info!(
                            processed = reports.len(),
                            delivered = delivered,
                            "relay_batch_complete"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "queue_receive_failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!("relay_loop_stopped");
    }

    /// Receive one batch and process its entries in order.
    ///
    /// Returns an empty batch if `shutdown` fires during the long-poll.
    pub async fn poll_once(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Vec<EntryReport>, QueueError> {
        let entries = tokio::select! {
            _ = shutdown.cancelled() => return Ok(Vec::new()),
            received = self.queue.receive(&self.receive) => received?,
        };

        debug!(count = entries.len(), "queue_batch_received");

        let mut reports = Vec::with_capacity(entries.len());
        for entry in entries {
            if shutdown.is_cancelled() {
                warn!(message_id = %entry.message_id, "relay_entry_left_for_redelivery");
                continue;
            }
            reports.push(self.process_entry(entry).await);
        }

        Ok(reports)
    }

    /// Deserialize, relay and delete a single entry.
    pub async fn process_entry(&self, entry: QueueEntry) -> EntryReport {
        let outcome = match WebhookEnvelope::from_json(&entry.body) {
            Ok(envelope) => {
                info!(
                    message_id = %entry.message_id,
                    event = envelope.event().unwrap_or("unknown"),
                    "relay_message_received"
                );

                match self.relay.relay(&entry.message_id, &envelope).await {
                    RelayOutcome::Delivered => EntryOutcome::Delivered,
                    RelayOutcome::Failed(_) => EntryOutcome::RelayFailed,
                }
            }
            Err(e) => {
                error!(
                    message_id = %entry.message_id,
                    error = %e,
                    body_preview = %preview(&entry.body),
                    "relay_message_malformed"
                );
                EntryOutcome::Malformed
            }
        };

        let deleted = self.delete_entry(&entry).await;

        EntryReport {
            message_id: entry.message_id,
            outcome,
            deleted,
        }
    }

    /// Delete a processed entry. Failures are logged and otherwise ignored.
    async fn delete_entry(&self, entry: &QueueEntry) -> bool {
        match self.queue.delete(&entry.receipt).await {
            Ok(()) => {
                debug!(message_id = %entry.message_id, "queue_entry_deleted");
                true
            }
            Err(e) => {
                let e = RelayError::Delete(e);
                error!(message_id = %entry.message_id, error = %e, "queue_delete_failed");
                false
            }
        }
    }
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(500);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
