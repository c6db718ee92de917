//! In-process queue used by tests and local runs without SQS.
//!
//! Models the provider behaviour the pipeline relies on: received messages
//! stay in flight until deleted, `requeue_in_flight` stands in for the
//! visibility timeout expiring, grouped sends are de-duplicated by id, and
//! `receive` long-polls up to the requested wait.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{batch_entry_id, BatchOutcome, BatchSuccess, MessageQueue, OutboundMessage, QueueMessage};
use crate::errors::QueueError;

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    message_id: String,
    body: String,
}

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<Stored>,
    in_flight: HashMap<String, Stored>,
    sent: Vec<OutboundMessage>,
    deleted: Vec<String>,
    dedup: HashMap<(String, String), String>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<R>(&self, url: &str, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        f(queues.entry(url.to_string()).or_default())
    }

    fn accept(state: &mut QueueState, message: OutboundMessage) -> String {
        if let (Some(group), Some(dedup)) = (&message.group_id, &message.deduplication_id) {
            if let Some(existing) = state.dedup.get(&(group.clone(), dedup.clone())) {
                return existing.clone();
            }
        }
        let message_id = Uuid::new_v4().to_string();
        if let (Some(group), Some(dedup)) = (&message.group_id, &message.deduplication_id) {
            state
                .dedup
                .insert((group.clone(), dedup.clone()), message_id.clone());
        }
        state.next_seq += 1;
        state.visible.push_back(Stored {
            seq: state.next_seq,
            message_id: message_id.clone(),
            body: message.body.clone(),
        });
        state.sent.push(message);
        message_id
    }

    /// Every message accepted on `url`, in send order (de-duplicated sends excluded).
    pub fn sent(&self, url: &str) -> Vec<OutboundMessage> {
        self.with_queue(url, |q| q.sent.clone())
    }

    /// Message ids deleted from `url`, in delete order.
    pub fn deleted(&self, url: &str) -> Vec<String> {
        self.with_queue(url, |q| q.deleted.clone())
    }

    pub fn visible_count(&self, url: &str) -> usize {
        self.with_queue(url, |q| q.visible.len())
    }

    pub fn in_flight_count(&self, url: &str) -> usize {
        self.with_queue(url, |q| q.in_flight.len())
    }

    /// Makes every undeleted in-flight message visible again, as if its
    /// visibility timeout had expired. Returns how many were requeued.
    pub fn requeue_in_flight(&self, url: &str) -> usize {
        let count = self.with_queue(url, |q| {
            let mut returned: Vec<Stored> = q.in_flight.drain().map(|(_, m)| m).collect();
            returned.sort_by_key(|m| m.seq);
            let count = returned.len();
            for message in returned.into_iter().rev() {
                q.visible.push_front(message);
            }
            count
        });
        self.notify.notify_waiters();
        count
    }

    fn take_visible(&self, url: &str, max: usize) -> Vec<QueueMessage> {
        self.with_queue(url, |q| {
            let mut taken = Vec::new();
            while taken.len() < max {
                let Some(stored) = q.visible.pop_front() else {
                    break;
                };
                let receipt_handle = Uuid::new_v4().to_string();
                taken.push(QueueMessage {
                    message_id: stored.message_id.clone(),
                    receipt_handle: receipt_handle.clone(),
                    body: stored.body.clone(),
                });
                q.in_flight.insert(receipt_handle, stored);
            }
            taken
        })
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, queue_url: &str, message: OutboundMessage) -> Result<String, QueueError> {
        let id = self.with_queue(queue_url, |q| Self::accept(q, message));
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        messages: Vec<OutboundMessage>,
        offset: usize,
    ) -> Result<BatchOutcome, QueueError> {
        let successful: Vec<BatchSuccess> = self.with_queue(queue_url, |q| {
            messages
                .into_iter()
                .enumerate()
                .map(|(i, message)| BatchSuccess {
                    id: batch_entry_id(offset + i),
                    message_id: Self::accept(q, message),
                })
                .collect()
        });
        self.notify.notify_waiters();
        Ok(BatchOutcome {
            successful,
            failed: Vec::new(),
        })
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let max = max_messages.clamp(1, 10) as usize;
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let taken = self.take_visible(queue_url, max);
            if !taken.is_empty() {
                return Ok(taken);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.with_queue(queue_url, |q| match q.in_flight.remove(receipt_handle) {
            Some(stored) => {
                q.deleted.push(stored.message_id);
                Ok(())
            }
            None => Err(QueueError::InvalidReceipt(receipt_handle.to_string())),
        })
    }
}
