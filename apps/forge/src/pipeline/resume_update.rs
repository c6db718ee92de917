use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Disposition, FollowUp, MessageHandler};
use crate::errors::{PipelineError, StoreError};
use crate::messages::{
    NotificationPayload, PdfGenerationPayload, ResumeUpdatePayload, WorkItem, WorkItemKind,
};
use crate::queue::Channel;
use crate::store::ResumeStore;

/// Applies queued partial updates to the resume store.
pub struct ResumeUpdateHandler {
    store: Arc<dyn ResumeStore>,
}

impl ResumeUpdateHandler {
    pub fn new(store: Arc<dyn ResumeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for ResumeUpdateHandler {
    fn name(&self) -> &'static str {
        "resume-update"
    }

    fn channel(&self) -> Channel {
        Channel::ResumeUpdates
    }

    fn kind(&self) -> WorkItemKind {
        WorkItemKind::ResumeUpdate
    }

    async fn handle(&self, item: &WorkItem) -> Result<Disposition, PipelineError> {
        let payload: ResumeUpdatePayload = match item.payload() {
            Ok(payload) => payload,
            Err(e) => return Ok(Disposition::dead_letter(format!("malformed payload: {e}"))),
        };

        let updated = match self
            .store
            .find_and_update(&payload.resume_id, &payload.user_id, &payload.updates)
            .await
        {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                return Err(PipelineError::not_found(
                    &payload.resume_id,
                    &payload.user_id,
                ))
            }
            Err(StoreError::Validation(reason)) => {
                warn!(resume_id = %payload.resume_id, reason = %reason, "Rejected resume update");
                return Ok(Disposition::dead_letter(format!("invalid update: {reason}")));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            resume_id = %updated.id,
            user_id = %updated.user_id,
            version = updated.version,
            "Resume updated"
        );

        let mut follow_ups = Vec::with_capacity(2);
        if payload.generate_pdf {
            follow_ups.push(FollowUp::PdfGeneration(PdfGenerationPayload {
                user_id: payload.user_id.clone(),
                resume_id: payload.resume_id.clone(),
                template: payload.requested_template(),
            }));
        }
        follow_ups.push(FollowUp::Notification(NotificationPayload::resume_updated(
            &payload.user_id,
        )));

        Ok(Disposition::Processed { follow_ups })
    }
}
