//! Queue consumers: a generic polling [`worker::Worker`] driven by a
//! per-queue [`MessageHandler`], and the [`supervisor::Supervisor`] that owns
//! the running workers.

pub mod backoff;
pub mod pdf_generation;
pub mod resume_update;
pub mod supervisor;
pub mod worker;

use async_trait::async_trait;

use crate::errors::PipelineError;
use crate::messages::{NotificationPayload, PdfGenerationPayload, WorkItem, WorkItemKind};
use crate::queue::Channel;

pub use pdf_generation::PdfGenerationHandler;
pub use resume_update::ResumeUpdateHandler;
pub use supervisor::{ManagedWorker, Supervisor};
pub use worker::{Worker, WorkerConfig};

/// Work emitted after a message has been processed and deleted.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    PdfGeneration(PdfGenerationPayload),
    Notification(NotificationPayload),
}

/// What the worker should do with a message once the handler is done.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Delete the message, then emit the follow-ups in order.
    Processed { follow_ups: Vec<FollowUp> },
    /// The message can never succeed. Forward it to the dead-letter queue.
    DeadLetter { reason: String },
}

impl Disposition {
    pub fn dead_letter(reason: impl Into<String>) -> Self {
        Disposition::DeadLetter {
            reason: reason.into(),
        }
    }
}

/// Final state of one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    DeadLettered,
    /// Unprocessable but no dead-letter queue is configured; left for redelivery.
    Retained,
}

/// Processes the work items of one queue.
///
/// Returning `Err` leaves the message undeleted so the provider redelivers
/// it once its visibility timeout lapses.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Queue this handler consumes.
    fn channel(&self) -> Channel;

    /// Envelope type accepted on that queue. Anything else is dead-lettered.
    fn kind(&self) -> WorkItemKind;

    async fn handle(&self, item: &WorkItem) -> Result<Disposition, PipelineError>;
}
