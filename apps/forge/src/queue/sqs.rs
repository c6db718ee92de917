use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_sqs::config::Credentials;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::SendMessageBatchRequestEntry;
use aws_sdk_sqs::Client;
use tracing::{debug, error};

use super::{
    batch_entry_id, BatchFailure, BatchOutcome, BatchSuccess, MessageQueue, OutboundMessage,
    QueueMessage,
};
use crate::config::Config;
use crate::errors::QueueError;

/// `MessageQueue` backed by Amazon SQS.
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
}

impl SqsQueue {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Constructs an SQS client with static credentials and an optional
    /// endpoint override (LocalStack / ElasticMQ locally, AWS in production).
    pub async fn from_config(config: &Config) -> Self {
        let credentials = Credentials::new(
            &config.aws_access_key_id,
            &config.aws_secret_access_key,
            None,
            None,
            "forge-static",
        );

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.sqs_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Self::new(Client::new(&sdk_config))
    }
}

fn transport_error<E: std::error::Error>(operation: &str, queue_url: &str, err: E) -> QueueError {
    let detail = DisplayErrorContext(err).to_string();
    error!(operation, queue_url, error = %detail, "SQS request failed");
    QueueError::Transport(format!("{operation} on {queue_url}: {detail}"))
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn send(&self, queue_url: &str, message: OutboundMessage) -> Result<String, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(message.body)
            .set_message_group_id(message.group_id)
            .set_message_deduplication_id(message.deduplication_id)
            .send()
            .await
            .map_err(|e| transport_error("SendMessage", queue_url, e))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        messages: Vec<OutboundMessage>,
        offset: usize,
    ) -> Result<BatchOutcome, QueueError> {
        if messages.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let entries = messages
            .into_iter()
            .enumerate()
            .map(|(i, message)| {
                SendMessageBatchRequestEntry::builder()
                    .id(batch_entry_id(offset + i))
                    .message_body(message.body)
                    .set_message_group_id(message.group_id)
                    .set_message_deduplication_id(message.deduplication_id)
                    .build()
                    .map_err(|e| QueueError::Build(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| transport_error("SendMessageBatch", queue_url, e))?;

        Ok(BatchOutcome {
            successful: output
                .successful()
                .iter()
                .map(|entry| BatchSuccess {
                    id: entry.id().to_string(),
                    message_id: entry.message_id().to_string(),
                })
                .collect(),
            failed: output
                .failed()
                .iter()
                .map(|entry| BatchFailure {
                    id: entry.id().to_string(),
                    code: entry.code().to_string(),
                    message: entry.message().map(str::to_string),
                    sender_fault: entry.sender_fault(),
                })
                .collect(),
        })
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let wait_secs = i32::try_from(wait.as_secs()).unwrap_or(20).min(20);
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages.clamp(1, 10))
            .wait_time_seconds(wait_secs)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| transport_error("ReceiveMessage", queue_url, e))?;

        let messages: Vec<QueueMessage> = output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(QueueMessage {
                    message_id: m.message_id()?.to_string(),
                    receipt_handle: m.receipt_handle()?.to_string(),
                    body: m.body().unwrap_or_default().to_string(),
                })
            })
            .collect();
        debug!(queue_url, count = messages.len(), "Received messages");
        Ok(messages)
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| transport_error("DeleteMessage", queue_url, e))?;
        debug!(queue_url, "Message deleted");
        Ok(())
    }
}
