//! Polling worker shared by every queue consumer.
//!
//! A worker is one tokio task running a sequential loop: receive a batch,
//! process each message in order, sleep. The first failing message aborts the
//! rest of the batch; those messages stay in flight and come back after their
//! visibility timeout. Failed cycles back off exponentially with jitter and a
//! successful cycle resets the attempt counter.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WORKER_MAX_MESSAGES` | `10` | Messages per receive (1-10) |
//! | `WORKER_WAIT_TIME_SECONDS` | `20` | Long-poll wait per receive |
//! | `WORKER_IDLE_DELAY_MS` | `250` | Pause after an empty receive |
//! | `WORKER_BACKOFF_INITIAL_MS` | `5000` | First backoff delay |
//! | `WORKER_BACKOFF_MAX_MS` | `60000` | Backoff ceiling |
//! | `WORKER_BACKOFF_JITTER` | `0.2` | Fraction of the delay randomized away |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::BackoffPolicy;
use super::{Disposition, FollowUp, MessageHandler, Outcome};
use crate::config::Config;
use crate::errors::PipelineError;
use crate::messages::WorkItem;
use crate::queue::{QueueClient, QueueMessage, MAX_BATCH_SIZE};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_messages: i32,
    pub idle_delay: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_messages: MAX_BATCH_SIZE as i32,
            idle_delay: Duration::from_millis(250),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_messages: config.worker_max_messages,
            idle_delay: Duration::from_millis(config.worker_idle_delay_ms),
            backoff: config.backoff_policy(),
        }
    }

    pub fn with_max_messages(mut self, max_messages: i32) -> Self {
        self.max_messages = max_messages.clamp(1, MAX_BATCH_SIZE as i32);
        self
    }

    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Counts for one receive-and-process cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub processed: usize,
    pub dead_lettered: usize,
    pub retained: usize,
}

enum WorkerState {
    Stopped,
    Running {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
}

struct Shared<H> {
    handler: H,
    queue: QueueClient,
    config: WorkerConfig,
}

pub struct Worker<H> {
    shared: Arc<Shared<H>>,
    state: Mutex<WorkerState>,
}

impl<H: MessageHandler> Worker<H> {
    pub fn new(handler: H, queue: QueueClient, config: WorkerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                queue,
                config,
            }),
            state: Mutex::new(WorkerState::Stopped),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.handler.name()
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    /// Spawns the polling loop. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let WorkerState::Running { task, .. } = &*state {
            if !task.is_finished() {
                debug!(worker = self.name(), "Worker already running");
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(shared.run(cancel.clone()));
        *state = WorkerState::Running { cancel, task };
        true
    }

    /// Signals the loop to stop and waits for it to exit. The cycle in
    /// progress, if any, runs to completion first. Returns `false` if the
    /// worker was not running.
    pub async fn stop(&self) -> bool {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, WorkerState::Stopped)
        };
        let WorkerState::Running { cancel, task } = previous else {
            return false;
        };

        cancel.cancel();
        if let Err(e) = task.await {
            error!(worker = self.name(), error = %e, "Worker task ended abnormally");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        matches!(&*state, WorkerState::Running { task, .. } if !task.is_finished())
    }

    /// Runs a single receive-and-process cycle.
    pub async fn poll_once(&self) -> Result<CycleReport, PipelineError> {
        self.shared.poll_once().await
    }

    pub async fn process_message(&self, message: &QueueMessage) -> Result<Outcome, PipelineError> {
        self.shared.process_message(message).await
    }
}

impl<H: MessageHandler> Shared<H> {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let worker = self.handler.name();
        info!(worker, queue = %self.handler.channel(), "Worker started");

        let mut failures: u32 = 0;
        while !cancel.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(report) => {
                    failures = 0;
                    if report.received == 0 {
                        self.config.idle_delay
                    } else {
                        Duration::ZERO
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.backoff.delay_for(failures);
                    error!(
                        worker,
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Poll cycle failed, backing off"
                    );
                    delay
                }
            };

            if pause.is_zero() {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(worker, "Worker stopped");
    }

    async fn poll_once(&self) -> Result<CycleReport, PipelineError> {
        let messages = self
            .queue
            .receive(self.handler.channel(), self.config.max_messages)
            .await?;

        let mut report = CycleReport {
            received: messages.len(),
            ..Default::default()
        };
        if !messages.is_empty() {
            debug!(worker = self.handler.name(), count = messages.len(), "Processing batch");
        }

        for message in &messages {
            let outcome = self.process_message(message).await.map_err(|e| {
                warn!(
                    worker = self.handler.name(),
                    message_id = %message.message_id,
                    error = %e,
                    "Message failed, aborting remaining batch"
                );
                e
            })?;
            match outcome {
                Outcome::Processed => report.processed += 1,
                Outcome::DeadLettered => report.dead_lettered += 1,
                Outcome::Retained => report.retained += 1,
            }
        }
        Ok(report)
    }

    #[instrument(skip_all, fields(worker = self.handler.name(), message_id = %message.message_id))]
    async fn process_message(&self, message: &QueueMessage) -> Result<Outcome, PipelineError> {
        let item = match WorkItem::parse(&message.body) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "Malformed message envelope");
                return self
                    .dead_letter(message, &format!("malformed envelope: {e}"))
                    .await;
            }
        };

        let expected = self.handler.kind();
        if item.kind() != Some(expected) {
            warn!(kind = %item.kind, expected = %expected, "Unknown message type");
            return self
                .dead_letter(message, &format!("unexpected message type '{}'", item.kind))
                .await;
        }

        match self.handler.handle(&item).await? {
            Disposition::Processed { follow_ups } => {
                self.queue
                    .delete(self.handler.channel(), &message.receipt_handle)
                    .await?;
                debug!("Message deleted");
                for follow_up in &follow_ups {
                    self.emit(follow_up).await?;
                }
                Ok(Outcome::Processed)
            }
            Disposition::DeadLetter { reason } => {
                warn!(reason = %reason, "Message rejected by handler");
                self.dead_letter(message, &reason).await
            }
        }
    }

    async fn emit(&self, follow_up: &FollowUp) -> Result<(), PipelineError> {
        match follow_up {
            FollowUp::PdfGeneration(payload) => {
                self.queue.queue_pdf_generation(payload).await?;
            }
            FollowUp::Notification(payload) => {
                self.queue.queue_notification(payload).await?;
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<Outcome, PipelineError> {
        let channel = self.handler.channel();
        if !self.queue.dead_letter(channel, message, reason).await? {
            error!(
                queue = %channel,
                reason,
                "No dead-letter queue configured; leaving message for redelivery"
            );
            return Ok(Outcome::Retained);
        }
        self.queue.delete(channel, &message.receipt_handle).await?;
        Ok(Outcome::DeadLettered)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::errors::QueueError;
    use crate::messages::WorkItemKind;
    use crate::queue::{
        BatchOutcome, Channel, InMemoryQueue, MessageQueue, OutboundMessage, QueueRouter,
    };

    const UPDATES: &str = "mem://updates";
    const DEAD: &str = "mem://dead";

    /// Fails for one resume id, optionally pausing inside every message.
    struct ScriptedHandler {
        fail_on: Option<&'static str>,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn new() -> Self {
            Self {
                fail_on: None,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn channel(&self) -> Channel {
            Channel::ResumeUpdates
        }

        fn kind(&self) -> WorkItemKind {
            WorkItemKind::ResumeUpdate
        }

        async fn handle(&self, item: &WorkItem) -> Result<Disposition, PipelineError> {
            let id = item.data["resumeId"].as_str().unwrap_or_default().to_string();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.seen.lock().unwrap().push(id.clone());
            if self.fail_on == Some(id.as_str()) {
                return Err(PipelineError::not_found(&id, "u1"));
            }
            Ok(Disposition::Processed {
                follow_ups: Vec::new(),
            })
        }
    }

    /// Receive results are taken from a script; every call is timestamped.
    struct ScriptedReceiveQueue {
        script: Mutex<Vec<bool>>,
        calls: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl MessageQueue for ScriptedReceiveQueue {
        async fn send(&self, _: &str, _: OutboundMessage) -> Result<String, QueueError> {
            Ok("id".into())
        }

        async fn send_batch(
            &self,
            _: &str,
            _: Vec<OutboundMessage>,
            _: usize,
        ) -> Result<BatchOutcome, QueueError> {
            Ok(BatchOutcome::default())
        }

        async fn receive(
            &self,
            _: &str,
            _: i32,
            _: Duration,
        ) -> Result<Vec<QueueMessage>, QueueError> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut script = self.script.lock().unwrap();
            let ok = if script.is_empty() { false } else { script.remove(0) };
            if ok {
                Ok(Vec::new())
            } else {
                Err(QueueError::Transport("connection refused".into()))
            }
        }

        async fn delete(&self, _: &str, _: &str) -> Result<(), QueueError> {
            Ok(())
        }
    }

    fn router(dead_letter: bool) -> QueueRouter {
        QueueRouter::new(UPDATES.into(), "mem://pdf".into(), "mem://notify".into())
            .with_dead_letter(dead_letter.then(|| DEAD.to_string()))
    }

    fn config() -> WorkerConfig {
        WorkerConfig::default()
            .with_idle_delay(Duration::from_millis(500))
            .with_backoff(
                BackoffPolicy::default()
                    .with_initial(Duration::from_secs(1))
                    .with_max(Duration::from_secs(4))
                    .with_jitter(0.0),
            )
    }

    fn worker_on(
        transport: Arc<dyn MessageQueue>,
        handler: ScriptedHandler,
        dead_letter: bool,
    ) -> Worker<ScriptedHandler> {
        let client = QueueClient::new(transport, router(dead_letter)).with_wait_time(Duration::ZERO);
        Worker::new(handler, client, config())
    }

    async fn enqueue(queue: &InMemoryQueue, body: String) {
        queue
            .send(
                UPDATES,
                OutboundMessage {
                    body,
                    group_id: None,
                    deduplication_id: None,
                },
            )
            .await
            .unwrap();
    }

    fn update_body(resume_id: &str) -> String {
        json!({
            "type": "RESUME_UPDATE",
            "data": {"userId": "u1", "resumeId": resume_id, "updates": {}},
            "timestamp": "2024-01-01T00:00:00.000Z"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_first_failure_aborts_remaining_batch() {
        let queue = Arc::new(InMemoryQueue::new());
        for id in ["r1", "r2", "r3"] {
            enqueue(&queue, update_body(id)).await;
        }
        let handler = ScriptedHandler {
            fail_on: Some("r2"),
            ..ScriptedHandler::new()
        };
        let worker = worker_on(queue.clone(), handler, true);

        let err = worker.poll_once().await.unwrap_err();

        assert!(matches!(err, PipelineError::ResumeNotFound { .. }));
        assert_eq!(worker.handler().seen(), vec!["r1", "r2"]);
        assert_eq!(queue.deleted(UPDATES).len(), 1);
        assert_eq!(queue.in_flight_count(UPDATES), 2);
    }

    #[tokio::test]
    async fn test_unknown_type_is_dead_lettered() {
        let queue = Arc::new(InMemoryQueue::new());
        enqueue(&queue, json!({"type": "BOGUS", "data": {}}).to_string()).await;
        enqueue(&queue, "not json".to_string()).await;
        let worker = worker_on(queue.clone(), ScriptedHandler::new(), true);

        let report = worker.poll_once().await.unwrap();

        assert_eq!(report.dead_lettered, 2);
        assert!(worker.handler().seen().is_empty());
        assert_eq!(queue.sent(DEAD).len(), 2);
        assert_eq!(queue.deleted(UPDATES).len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_type_is_retained_without_dead_letter_queue() {
        let queue = Arc::new(InMemoryQueue::new());
        enqueue(&queue, json!({"type": "BOGUS", "data": {}}).to_string()).await;
        let worker = worker_on(queue.clone(), ScriptedHandler::new(), false);

        let report = worker.poll_once().await.unwrap();

        assert_eq!(report.retained, 1);
        assert!(queue.deleted(UPDATES).is_empty());
        assert_eq!(queue.in_flight_count(UPDATES), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let queue = Arc::new(InMemoryQueue::new());
        let worker = worker_on(queue, ScriptedHandler::new(), true);

        assert!(worker.start());
        assert!(!worker.start());
        assert!(worker.is_running());

        assert!(worker.stop().await);
        assert!(!worker.is_running());
        assert!(!worker.stop().await);

        assert!(worker.start());
        assert!(worker.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_cycle_finish() {
        let queue = Arc::new(InMemoryQueue::new());
        enqueue(&queue, update_body("r1")).await;
        let handler = ScriptedHandler {
            delay: Duration::from_secs(3),
            ..ScriptedHandler::new()
        };
        let worker = worker_on(queue.clone(), handler, true);

        worker.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.in_flight_count(UPDATES), 1);

        worker.stop().await;

        assert_eq!(worker.handler().seen(), vec!["r1"]);
        assert_eq!(queue.deleted(UPDATES).len(), 1);
        assert_eq!(queue.in_flight_count(UPDATES), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_back_off_and_reset_on_success() {
        // fail, fail, empty success, fail, then failures forever
        let transport = Arc::new(ScriptedReceiveQueue {
            script: Mutex::new(vec![false, false, true, false]),
            calls: Mutex::new(Vec::new()),
        });
        let worker = worker_on(transport.clone(), ScriptedHandler::new(), true);
        let started = Instant::now();

        worker.start();
        tokio::time::sleep(Duration::from_millis(5_200)).await;
        worker.stop().await;

        let calls = transport.calls.lock().unwrap().clone();
        let offsets: Vec<Duration> = calls.iter().map(|c| *c - started).collect();
        // 0 fail -> 1s, 1 fail -> 2s, 3 ok -> idle 0.5s, 3.5 fail -> 1s, 4.5 fail -> 2s
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_millis(3_500),
                Duration::from_millis(4_500),
            ]
        );
        // the pending 2s backoff was interrupted by stop
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
