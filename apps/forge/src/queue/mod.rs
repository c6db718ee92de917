//! Message queue client: transport trait, channel routing and typed producers.
//!
//! Everything that touches a queue goes through `QueueClient`. Transports
//! (`SqsQueue`, `InMemoryQueue`) only move opaque string bodies; the client
//! owns envelope serialization, routing and de-duplication ids.

pub mod memory;
pub mod sqs;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::errors::QueueError;
use crate::messages::{
    iso_timestamp, DeadLetter, NotificationPayload, PdfGenerationPayload, ResumeUpdatePayload,
    WorkItem, WorkItemKind,
};

pub use memory::InMemoryQueue;
pub use sqs::SqsQueue;

/// SQS rejects batches larger than this.
pub const MAX_BATCH_SIZE: usize = 10;
/// Long-poll wait used when the caller does not override it.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(20);

// ────────────────────────────────────────────────────────────────────────────
// Transport-level types
// ────────────────────────────────────────────────────────────────────────────

/// A message handed back by `receive`. Delete it with `receipt_handle`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub body: String,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSuccess {
    pub id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
    pub sender_fault: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub successful: Vec<BatchSuccess>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
    }
}

/// Entry id used for the message at `index` of a batch.
pub fn batch_entry_id(index: usize) -> String {
    format!("msg{index}")
}

/// Raw queue operations against a queue URL. Implement this to swap
/// providers without touching workers or producers.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, queue_url: &str, message: OutboundMessage) -> Result<String, QueueError>;

    /// Sends up to `MAX_BATCH_SIZE` messages; entry ids are `msg<offset + i>`.
    async fn send_batch(
        &self,
        queue_url: &str,
        messages: Vec<OutboundMessage>,
        offset: usize,
    ) -> Result<BatchOutcome, QueueError>;

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Routing
// ────────────────────────────────────────────────────────────────────────────

/// Logical queues used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ResumeUpdates,
    PdfGeneration,
    Notifications,
    DeadLetter,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ResumeUpdates => "RESUME_UPDATES",
            Channel::PdfGeneration => "PDF_GENERATION",
            Channel::Notifications => "NOTIFICATIONS",
            Channel::DeadLetter => "DEAD_LETTER",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static channel → queue URL map.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRouter {
    resume_updates: String,
    pdf_generation: String,
    notifications: String,
    dead_letter: Option<String>,
}

impl QueueRouter {
    pub fn new(resume_updates: String, pdf_generation: String, notifications: String) -> Self {
        Self {
            resume_updates,
            pdf_generation,
            notifications,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, url: Option<String>) -> Self {
        self.dead_letter = url;
        self
    }

    pub fn url(&self, channel: Channel) -> Result<&str, QueueError> {
        match channel {
            Channel::ResumeUpdates => Ok(&self.resume_updates),
            Channel::PdfGeneration => Ok(&self.pdf_generation),
            Channel::Notifications => Ok(&self.notifications),
            Channel::DeadLetter => self
                .dead_letter
                .as_deref()
                .ok_or(QueueError::UnroutedChannel(channel)),
        }
    }

    pub fn has_dead_letter(&self) -> bool {
        self.dead_letter.is_some()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// A work item queued as part of a batch.
#[derive(Debug, Clone)]
pub struct OutgoingItem {
    pub item: WorkItem,
    pub group_key: Option<String>,
    /// Overrides the content-derived de-duplication id.
    pub idempotency_key: Option<String>,
}

/// De-duplication id for grouped (FIFO) sends: SHA-256 over the group key and
/// the exact body, so only byte-identical messages in one group collapse.
pub fn deduplication_id(group_key: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(group_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// SQS FIFO queue names end in `.fifo`.
pub fn is_fifo(queue_url: &str) -> bool {
    queue_url.ends_with(".fifo")
}

#[derive(Clone)]
pub struct QueueClient {
    transport: Arc<dyn MessageQueue>,
    router: QueueRouter,
    wait_time: Duration,
}

impl QueueClient {
    pub fn new(transport: Arc<dyn MessageQueue>, router: QueueRouter) -> Self {
        Self {
            transport,
            router,
            wait_time: DEFAULT_WAIT_TIME,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    fn outbound(
        item: &WorkItem,
        group_key: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<OutboundMessage, QueueError> {
        let body = item.to_body()?;
        let deduplication_id = group_key.map(|group| match idempotency_key {
            Some(key) => key.to_string(),
            None => deduplication_id(group, &body),
        });
        Ok(OutboundMessage {
            body,
            group_id: group_key.map(str::to_string),
            deduplication_id,
        })
    }

    /// Sends one work item and returns the provider message id.
    pub async fn send(
        &self,
        channel: Channel,
        item: &WorkItem,
        group_key: Option<&str>,
    ) -> Result<String, QueueError> {
        let url = self.router.url(channel)?;
        let message = Self::outbound(item, group_key, None)?;
        let message_id = self.transport.send(url, message).await?;
        info!(queue = %channel, kind = %item.kind, message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    /// Sends many work items, chunked to the provider batch limit.
    /// Per-entry failures are reported in the outcome, not as an error.
    pub async fn send_batch(
        &self,
        channel: Channel,
        items: &[OutgoingItem],
    ) -> Result<BatchOutcome, QueueError> {
        let url = self.router.url(channel)?;
        let mut outcome = BatchOutcome::default();
        for (chunk_index, chunk) in items.chunks(MAX_BATCH_SIZE).enumerate() {
            let messages = chunk
                .iter()
                .map(|o| {
                    Self::outbound(&o.item, o.group_key.as_deref(), o.idempotency_key.as_deref())
                })
                .collect::<Result<Vec<_>, _>>()?;
            let part = self
                .transport
                .send_batch(url, messages, chunk_index * MAX_BATCH_SIZE)
                .await?;
            outcome.merge(part);
        }
        info!(
            queue = %channel,
            successful = outcome.successful.len(),
            failed = outcome.failed.len(),
            "Batch messages sent"
        );
        if !outcome.failed.is_empty() {
            warn!(queue = %channel, failed = ?outcome.failed, "Some batch entries were rejected");
        }
        Ok(outcome)
    }

    pub async fn receive(
        &self,
        channel: Channel,
        max_messages: i32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let url = self.router.url(channel)?;
        self.transport
            .receive(url, max_messages, self.wait_time)
            .await
    }

    pub async fn delete(&self, channel: Channel, receipt_handle: &str) -> Result<(), QueueError> {
        let url = self.router.url(channel)?;
        self.transport.delete(url, receipt_handle).await
    }

    /// Resume updates are grouped per user so edits apply in order.
    pub async fn queue_resume_update(
        &self,
        payload: &ResumeUpdatePayload,
    ) -> Result<String, QueueError> {
        let item = WorkItem::new(WorkItemKind::ResumeUpdate, payload)?;
        let group = format!("user-{}", payload.user_id);
        self.send(Channel::ResumeUpdates, &item, Some(&group)).await
    }

    pub async fn queue_pdf_generation(
        &self,
        payload: &PdfGenerationPayload,
    ) -> Result<String, QueueError> {
        let item = WorkItem::new(WorkItemKind::PdfGeneration, payload)?;
        self.send(Channel::PdfGeneration, &item, None).await
    }

    pub async fn queue_notification(
        &self,
        payload: &NotificationPayload,
    ) -> Result<String, QueueError> {
        let item = WorkItem::new(WorkItemKind::Notification, payload)?;
        self.send(Channel::Notifications, &item, None).await
    }

    /// Forwards an unprocessable message to the dead-letter queue.
    /// Returns `false` when no dead-letter queue is configured.
    pub async fn dead_letter(
        &self,
        source: Channel,
        message: &QueueMessage,
        reason: &str,
    ) -> Result<bool, QueueError> {
        if !self.router.has_dead_letter() {
            return Ok(false);
        }
        let url = self.router.url(Channel::DeadLetter)?;
        let letter = DeadLetter {
            source_queue: source.as_str().to_string(),
            reason: reason.to_string(),
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            dead_lettered_at: iso_timestamp(Utc::now()),
        };
        let body = serde_json::to_string(&letter)?;
        // FIFO queues need a group; repeats of one source message collapse
        let group = is_fifo(url)
            .then(|| format!("dead-letter-{}", source.as_str().to_lowercase()));
        let outbound = OutboundMessage {
            deduplication_id: group
                .as_deref()
                .map(|g| deduplication_id(g, &message.message_id)),
            group_id: group,
            body,
        };
        let id = self.transport.send(url, outbound).await?;
        warn!(
            source = %source,
            message_id = %message.message_id,
            dead_letter_id = %id,
            reason,
            "Message moved to dead-letter queue"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn router() -> QueueRouter {
        QueueRouter::new(
            "mem://resume-updates".into(),
            "mem://pdf-generation".into(),
            "mem://notifications".into(),
        )
    }

    fn client(queue: &Arc<InMemoryQueue>, router: QueueRouter) -> QueueClient {
        QueueClient::new(queue.clone(), router).with_wait_time(Duration::ZERO)
    }

    #[test]
    fn test_router_resolves_channels() {
        let router = router();
        assert_eq!(router.url(Channel::PdfGeneration).unwrap(), "mem://pdf-generation");
        assert!(matches!(
            router.url(Channel::DeadLetter),
            Err(QueueError::UnroutedChannel(Channel::DeadLetter))
        ));
    }

    #[test]
    fn test_deduplication_id_depends_on_body_and_group() {
        let a = deduplication_id("user-u1", r#"{"type":"RESUME_UPDATE","timestamp":"1"}"#);
        let b = deduplication_id("user-u1", r#"{"type":"RESUME_UPDATE","timestamp":"2"}"#);
        let c = deduplication_id("user-u2", r#"{"type":"RESUME_UPDATE","timestamp":"1"}"#);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert_eq!(
            a,
            deduplication_id("user-u1", r#"{"type":"RESUME_UPDATE","timestamp":"1"}"#)
        );
    }

    #[tokio::test]
    async fn test_queue_resume_update_uses_user_group() {
        let queue = Arc::new(InMemoryQueue::new());
        let client = client(&queue, router());
        let payload = ResumeUpdatePayload {
            user_id: "u1".into(),
            resume_id: "r1".into(),
            updates: json!({"title": "T"}).as_object().unwrap().clone(),
            generate_pdf: false,
        };
        client.queue_resume_update(&payload).await.unwrap();

        let sent = queue.sent("mem://resume-updates");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].group_id.as_deref(), Some("user-u1"));
        assert_eq!(
            sent[0].deduplication_id.as_deref(),
            Some(deduplication_id("user-u1", &sent[0].body).as_str())
        );
        let body: Value = serde_json::from_str(&sent[0].body).unwrap();
        assert_eq!(body["type"], "RESUME_UPDATE");
        assert_eq!(body["data"]["resumeId"], "r1");
    }

    #[tokio::test]
    async fn test_ungrouped_send_has_no_deduplication_id() {
        let queue = Arc::new(InMemoryQueue::new());
        let client = client(&queue, router());
        client
            .queue_notification(&NotificationPayload::resume_updated("u1"))
            .await
            .unwrap();
        let sent = queue.sent("mem://notifications");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].group_id.is_none());
        assert!(sent[0].deduplication_id.is_none());
    }

    #[tokio::test]
    async fn test_send_batch_chunks_and_numbers_entries() {
        let queue = Arc::new(InMemoryQueue::new());
        let client = client(&queue, router());
        let items: Vec<OutgoingItem> = (0..12)
            .map(|i| OutgoingItem {
                item: WorkItem::new(
                    WorkItemKind::Notification,
                    &NotificationPayload::resume_updated(&format!("u{i}")),
                )
                .unwrap(),
                group_key: None,
                idempotency_key: None,
            })
            .collect();

        let outcome = client.send_batch(Channel::Notifications, &items).await.unwrap();
        assert_eq!(outcome.successful.len(), 12);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.successful[11].id, "msg11");
        assert_eq!(queue.visible_count("mem://notifications"), 12);
    }

    #[tokio::test]
    async fn test_batch_idempotency_key_overrides_content_hash() {
        let queue = Arc::new(InMemoryQueue::new());
        let client = client(&queue, router());
        let item = |user: &str| OutgoingItem {
            item: WorkItem::new(
                WorkItemKind::Notification,
                &NotificationPayload::resume_updated(user),
            )
            .unwrap(),
            group_key: Some("user-u1".into()),
            idempotency_key: Some("edit-42".into()),
        };
        client
            .send_batch(Channel::ResumeUpdates, &[item("u1"), item("u2")])
            .await
            .unwrap();
        // Same idempotency key in the same group: the second entry is collapsed.
        assert_eq!(queue.visible_count("mem://resume-updates"), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_without_queue_reports_false() {
        let queue = Arc::new(InMemoryQueue::new());
        let client = client(&queue, router());
        let message = QueueMessage {
            message_id: "m1".into(),
            receipt_handle: "h1".into(),
            body: "{}".into(),
        };
        assert!(!client
            .dead_letter(Channel::ResumeUpdates, &message, "bad")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_dead_letter_wraps_original_body() {
        let queue = Arc::new(InMemoryQueue::new());
        let router = router().with_dead_letter(Some("mem://dead-letter".into()));
        let client = client(&queue, router);
        let message = QueueMessage {
            message_id: "m1".into(),
            receipt_handle: "h1".into(),
            body: r#"{"type":"BOGUS"}"#.into(),
        };
        assert!(client
            .dead_letter(Channel::ResumeUpdates, &message, "unknown type")
            .await
            .unwrap());

        let sent = queue.sent("mem://dead-letter");
        let letter: DeadLetter = serde_json::from_str(&sent[0].body).unwrap();
        assert_eq!(letter.source_queue, "RESUME_UPDATES");
        assert_eq!(letter.reason, "unknown type");
        assert_eq!(letter.body, r#"{"type":"BOGUS"}"#);
        assert!(sent[0].group_id.is_none());
        assert!(sent[0].deduplication_id.is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_to_fifo_queue_is_grouped_by_source() {
        let queue = Arc::new(InMemoryQueue::new());
        let router = router().with_dead_letter(Some("mem://dead-letter.fifo".into()));
        let client = client(&queue, router);
        let message = QueueMessage {
            message_id: "m1".into(),
            receipt_handle: "h1".into(),
            body: r#"{"type":"BOGUS"}"#.into(),
        };

        for _ in 0..2 {
            assert!(client
                .dead_letter(Channel::PdfGeneration, &message, "unknown type")
                .await
                .unwrap());
        }

        let sent = queue.sent("mem://dead-letter.fifo");
        assert_eq!(sent[0].group_id.as_deref(), Some("dead-letter-pdf_generation"));
        assert_eq!(
            sent[0].deduplication_id.as_deref(),
            Some(deduplication_id("dead-letter-pdf_generation", "m1").as_str())
        );
        // the same source message is only dead-lettered once
        assert_eq!(queue.visible_count("mem://dead-letter.fifo"), 1);
    }

    /// Accepts every batch entry except the listed ids.
    struct RejectingQueue {
        rejected: Vec<String>,
    }

    #[async_trait]
    impl MessageQueue for RejectingQueue {
        async fn send(&self, _: &str, _: OutboundMessage) -> Result<String, QueueError> {
            Ok("m".into())
        }

        async fn send_batch(
            &self,
            _: &str,
            messages: Vec<OutboundMessage>,
            offset: usize,
        ) -> Result<BatchOutcome, QueueError> {
            let mut outcome = BatchOutcome::default();
            for index in offset..offset + messages.len() {
                let id = batch_entry_id(index);
                if self.rejected.contains(&id) {
                    outcome.failed.push(BatchFailure {
                        id,
                        code: "InvalidParameterValue".into(),
                        message: Some("message body too large".into()),
                        sender_fault: true,
                    });
                } else {
                    outcome.successful.push(BatchSuccess {
                        message_id: format!("sqs-{id}"),
                        id,
                    });
                }
            }
            Ok(outcome)
        }

        async fn receive(
            &self,
            _: &str,
            _: i32,
            _: Duration,
        ) -> Result<Vec<QueueMessage>, QueueError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _: &str, _: &str) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_batch_reports_rejected_entries() {
        let transport = Arc::new(RejectingQueue {
            rejected: vec!["msg1".into(), "msg11".into()],
        });
        let client = QueueClient::new(transport, router());
        let items: Vec<OutgoingItem> = (0..12)
            .map(|i| OutgoingItem {
                item: WorkItem::new(
                    WorkItemKind::Notification,
                    &NotificationPayload::resume_updated(&format!("u{i}")),
                )
                .unwrap(),
                group_key: None,
                idempotency_key: None,
            })
            .collect();

        let outcome = client.send_batch(Channel::Notifications, &items).await.unwrap();

        assert_eq!(outcome.successful.len(), 10);
        let failed: Vec<&str> = outcome.failed.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["msg1", "msg11"]);
        assert_eq!(outcome.failed[0].code, "InvalidParameterValue");
        assert!(outcome.failed[0].sender_fault);
    }
}
