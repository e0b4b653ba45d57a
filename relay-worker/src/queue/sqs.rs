//! Amazon SQS queue backend.

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client as SqsClient;
use tracing::{debug, info, warn};

use super::{QueueEntry, QueueError, QueueService, ReceiveOptions};

/// SQS-backed queue bound to one queue URL.
#[derive(Clone)]
pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsQueue {
    /// Load AWS configuration for `region` and bind to `queue_url`.
    ///
    /// Credentials come from the standard provider chain. `endpoint_url`
    /// overrides the service endpoint (LocalStack and similar).
    pub async fn connect(queue_url: &str, region: &str, endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_sqs::config::Region::new(region.to_string()));

        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        info!(queue_url = %queue_url, "sqs_client_created");

        Self::from_client(SqsClient::new(&sdk_config), queue_url)
    }

    /// Wrap an existing client.
    pub fn from_client(client: SqsClient, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

fn whole_seconds(duration: std::time::Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl QueueService for SqsQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Send(DisplayErrorContext(&e).to_string()))?;

        output
            .message_id
            .ok_or_else(|| QueueError::Send("no message id returned".to_string()))
    }

    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueEntry>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(options.max_messages as i32)
            .wait_time_seconds(whole_seconds(options.wait_time))
            .visibility_timeout(whole_seconds(options.visibility_timeout))
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let entries = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                let message_id = message.message_id.unwrap_or_else(|| "unknown".to_string());
                match message.receipt_handle {
                    Some(receipt) => Some(QueueEntry {
                        message_id,
                        receipt,
                        body: message.body.unwrap_or_default(),
                    }),
                    None => {
                        // Without a receipt the entry cannot be deleted; SQS will redeliver it.
                        warn!(message_id = %message_id, "sqs_message_without_receipt");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        debug!(count = entries.len(), "sqs_messages_received");
        Ok(entries)
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}
